//! Object lifecycle capability supplied by the pool's owner

use crate::errors::FactoryError;
use std::fmt;

/// Creates, validates and destroys the objects managed for each key.
///
/// All three calls may be slow (a network connect, a ping). The pool never
/// holds a sub-pool lock while calling into the factory.
///
/// # Examples
///
/// ```
/// use keyed_objectpool::{FactoryError, ObjectLifecycleFactory};
///
/// struct Connector;
///
/// impl ObjectLifecycleFactory<String, Vec<u8>> for Connector {
///     fn create(&self, key: &String) -> Result<Vec<u8>, FactoryError> {
///         Ok(key.as_bytes().to_vec())
///     }
///
///     fn validate(&self, _key: &String, value: &Vec<u8>) -> bool {
///         !value.is_empty()
///     }
/// }
/// ```
pub trait ObjectLifecycleFactory<K, V>: Send + Sync {
    /// Create a new object for `key`
    fn create(&self, key: &K) -> Result<V, FactoryError>;

    /// Check whether `value` is still usable
    fn validate(&self, _key: &K, _value: &V) -> bool {
        true
    }

    /// Release `value`. Errors are logged by the pool and otherwise ignored.
    fn destroy(&self, _key: &K, value: V) -> Result<(), FactoryError> {
        drop(value);
        Ok(())
    }
}

/// Factory built from closures
///
/// # Examples
///
/// ```
/// use keyed_objectpool::{FnFactory, ObjectLifecycleFactory};
///
/// let factory = FnFactory::new(|key: &u16| Ok(u32::from(*key) * 2))
///     .with_validator(|_, value| *value > 0);
///
/// assert_eq!(factory.create(&21).unwrap(), 42);
/// assert!(!factory.validate(&0, &0));
/// ```
pub struct FnFactory<K, V> {
    create: Box<dyn Fn(&K) -> Result<V, FactoryError> + Send + Sync>,
    validate: Option<Box<dyn Fn(&K, &V) -> bool + Send + Sync>>,
    destroy: Option<Box<dyn Fn(&K, V) -> Result<(), FactoryError> + Send + Sync>>,
}

impl<K, V> FnFactory<K, V> {
    pub fn new<F>(create: F) -> Self
    where
        F: Fn(&K) -> Result<V, FactoryError> + Send + Sync + 'static,
    {
        Self {
            create: Box::new(create),
            validate: None,
            destroy: None,
        }
    }

    pub fn with_validator<F>(mut self, validate: F) -> Self
    where
        F: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        self.validate = Some(Box::new(validate));
        self
    }

    pub fn with_destroyer<F>(mut self, destroy: F) -> Self
    where
        F: Fn(&K, V) -> Result<(), FactoryError> + Send + Sync + 'static,
    {
        self.destroy = Some(Box::new(destroy));
        self
    }
}

impl<K, V> ObjectLifecycleFactory<K, V> for FnFactory<K, V> {
    fn create(&self, key: &K) -> Result<V, FactoryError> {
        (self.create)(key)
    }

    fn validate(&self, key: &K, value: &V) -> bool {
        match self.validate {
            Some(ref validate) => validate(key, value),
            None => true,
        }
    }

    fn destroy(&self, key: &K, value: V) -> Result<(), FactoryError> {
        match self.destroy {
            Some(ref destroy) => destroy(key, value),
            None => Ok(()),
        }
    }
}

impl<K, V> fmt::Debug for FnFactory<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFactory")
            .field("validate", &self.validate.is_some())
            .field("destroy", &self.destroy.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_defaults_accept_and_drop() {
        let factory = FnFactory::new(|_: &&str| Ok(7));
        assert!(factory.validate(&"a", &7));
        assert!(factory.destroy(&"a", 7).is_ok());
    }

    #[test]
    fn test_destroyer_is_called() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&destroyed);
        let factory = FnFactory::new(|_: &&str| Ok(1)).with_destroyer(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        factory.destroy(&"a", 1).unwrap();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_create_error_passes_through() {
        let factory: FnFactory<&str, i32> =
            FnFactory::new(|key| Err(FactoryError::new(format!("cannot reach {key}"))));
        let err = factory.create(&"10.0.0.9:11211").unwrap_err();
        assert_eq!(err.message(), "cannot reach 10.0.0.9:11211");
    }
}
