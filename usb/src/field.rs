use parking_lot::RwLock;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

type Listener = Box<dyn Fn(f64) + Send + Sync>;

/// A named, thread safe value that notifies its listeners whenever it changes.
pub struct Field {
    name: String,
    value: RwLock<f64>,
    listeners: RwLock<Vec<Listener>>,
}

impl Field {
    pub fn new(name: impl Into<String>, value: f64) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            value: RwLock::new(value),
            listeners: RwLock::new(vec![]),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        *self.value.read()
    }

    /// Stores `value`, calling every listener if it differs from the current value.
    /// Listeners run on the calling thread.
    pub fn set(&self, value: f64) {
        {
            let mut current = self.value.write();
            if *current == value {
                return;
            }
            *current = value;
        }

        for listener in self.listeners.read().iter() {
            listener(value);
        }
    }

    pub fn on_change(&self, listener: impl Fn(f64) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }
}

impl Debug for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("value", &self.value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn notifies_on_change_only() {
        let field = Field::new("AGCGAIN", 1.0);
        let seen = Arc::new(Mutex::new(vec![]));

        let sink = seen.clone();
        field.on_change(move |value| sink.lock().push(value));

        field.set(1.0);
        field.set(2.5);
        field.set(2.5);
        field.set(3.0);

        assert_eq!(*seen.lock(), vec![2.5, 3.0]);
        assert_eq!(field.value(), 3.0);
        assert_eq!(field.name(), "AGCGAIN");
    }
}
