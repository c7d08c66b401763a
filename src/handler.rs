//! Per-line registration records.

use axerrno::{ax_err, AxResult};

use crate::InterruptId;

/// Callback style handler, called with the controller relative id and the
/// opaque value given at registration.
pub type InterruptHandler = fn(InterruptId, usize);

/// Vector style handler, called with the opaque value given at registration.
pub type VectorHandler = fn(usize);

/// Machine exception handler, called with the hart id and the exception code.
pub type ExceptionHandler = fn(usize, usize);

/// A sub-controller chained below one line of its parent.
///
/// When the parent line fires, the parent calls [`Cascade::cascade`] with the
/// parent side id before running its own registration for that line.
pub trait Cascade: Sync {
    fn cascade(&self, hart: usize, parent_line: InterruptId);
}

/// What runs when a line fires. Registering one style replaces the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Registration {
    #[default]
    Empty,
    Callback { handler: InterruptHandler, data: usize },
    Vector { handler: VectorHandler, data: usize },
}

#[derive(Clone, Copy, Default)]
pub(crate) struct Slot<'a> {
    pub registration: Registration,
    pub cascade: Option<&'a dyn Cascade>,
}

impl Slot<'_> {
    /// Runs the cascade, then the registration. Must be called without the
    /// owning table locked.
    pub fn deliver(&self, hart: usize, parent_line: InterruptId, id: InterruptId) {
        if let Some(cascade) = self.cascade {
            cascade.cascade(hart, parent_line);
        }
        match self.registration {
            Registration::Callback { handler, data } => handler(id, data),
            Registration::Vector { handler, data } => handler(data),
            Registration::Empty => default_handler(id),
        }
    }
}

/// Fallback for lines that fire with nothing registered.
fn default_handler(id: InterruptId) {
    trace!("interrupt {id} fired with no handler registered");
}

/// Fixed capacity, index addressed registration table.
pub(crate) struct HandlerTable<'a, const N: usize> {
    slots: [Slot<'a>; N],
}

impl<'a, const N: usize> HandlerTable<'a, N> {
    pub const fn new() -> Self {
        const EMPTY: Slot<'static> = Slot {
            registration: Registration::Empty,
            cascade: None,
        };
        Self { slots: [EMPTY; N] }
    }

    pub fn register(&mut self, index: usize, registration: Registration) -> AxResult {
        match self.slots.get_mut(index) {
            Some(slot) => {
                slot.registration = registration;
                Ok(())
            }
            None => ax_err!(InvalidInput, "handler slot out of range"),
        }
    }

    pub fn attach(&mut self, index: usize, cascade: &'a dyn Cascade) -> AxResult {
        match self.slots.get_mut(index) {
            Some(slot) => {
                slot.cascade = Some(cascade);
                Ok(())
            }
            None => ax_err!(InvalidInput, "cascade slot out of range"),
        }
    }

    pub fn slot(&self, index: usize) -> Option<Slot<'a>> {
        self.slots.get(index).copied()
    }

    #[cfg(test)]
    pub fn registration(&self, index: usize) -> Option<Registration> {
        self.slots.get(index).map(|slot| slot.registration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static CALLBACKS: AtomicUsize = AtomicUsize::new(0);
    static VECTORS: AtomicUsize = AtomicUsize::new(0);

    fn callback(id: InterruptId, data: usize) {
        CALLBACKS.fetch_add(id * 100 + data, Ordering::SeqCst);
    }

    fn vector(data: usize) {
        VECTORS.fetch_add(data, Ordering::SeqCst);
    }

    #[test]
    fn last_registration_wins() {
        let mut table = HandlerTable::<4>::new();
        table
            .register(2, Registration::Callback { handler: callback, data: 1 })
            .unwrap();
        table
            .register(2, Registration::Vector { handler: vector, data: 7 })
            .unwrap();

        table.slot(2).unwrap().deliver(0, 2, 2);
        assert_eq!(VECTORS.load(Ordering::SeqCst), 7);
        assert_eq!(CALLBACKS.load(Ordering::SeqCst), 0);

        table
            .register(2, Registration::Callback { handler: callback, data: 1 })
            .unwrap();
        table.slot(2).unwrap().deliver(0, 2, 2);
        assert_eq!(CALLBACKS.load(Ordering::SeqCst), 201);
        assert_eq!(VECTORS.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn out_of_range_slot_is_rejected() {
        let mut table = HandlerTable::<4>::new();
        assert_eq!(
            table.register(4, Registration::Callback { handler: callback, data: 0 }),
            Err(axerrno::AxError::InvalidInput)
        );
        assert!(table.slot(4).is_none());
        assert_eq!(table.registration(3), Some(Registration::Empty));
    }
}
