use keyed_objectpool::{FactoryError, ObjectLifecycleFactory};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A stand-in connection: the server it belongs to and a serial number
#[derive(Debug, PartialEq, Eq)]
pub struct Connection {
    pub server: String,
    pub serial: usize,
}

/// Factory that counts every lifecycle call and can be told to fail
#[derive(Debug, Default)]
pub struct CountingFactory {
    pub created: AtomicUsize,
    pub validated: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub fail_create: AtomicBool,
    pub reject: AtomicBool,
}

#[allow(dead_code)]
impl CountingFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }
}

impl ObjectLifecycleFactory<String, Connection> for CountingFactory {
    fn create(&self, key: &String) -> Result<Connection, FactoryError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(FactoryError::new(format!("connection to {key} refused")));
        }
        Ok(Connection {
            server: key.clone(),
            serial: self.created.fetch_add(1, Ordering::SeqCst),
        })
    }

    fn validate(&self, _key: &String, _value: &Connection) -> bool {
        self.validated.fetch_add(1, Ordering::SeqCst);
        !self.reject.load(Ordering::SeqCst)
    }

    fn destroy(&self, _key: &String, _value: Connection) -> Result<(), FactoryError> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
