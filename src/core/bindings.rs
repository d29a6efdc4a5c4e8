//! Caller-owned variable storage.
//!
//! Variable nodes never copy their value. They hold a [`BindingKey`] into a
//! [`Bindings`] table that the caller owns and mutates between evaluations;
//! the evaluator reads the slot each time it visits the variable.

use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// Handle to one slot of a [`Bindings`] table.
    pub struct BindingKey;
}

impl BindingKey {
    /// Stable 64-bit identity of the slot, used as the variable's hash key.
    #[must_use]
    pub fn identity(self) -> u64 {
        slotmap::Key::data(&self).as_ffi()
    }
}

/// Numeric storage behind a variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Binding {
    Double(f64),
    Integer(i64),
}

impl Binding {
    #[inline]
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        reason = "Integer bindings are allele counts and liability classes, far below 2^53"
    )]
    pub fn value(self) -> f64 {
        match self {
            Binding::Double(v) => v,
            Binding::Integer(v) => v as f64,
        }
    }
}

/// Table of variable values owned by the caller.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    slots: SlotMap<BindingKey, Binding>,
}

impl Bindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a double slot.
    pub fn double(&mut self, value: f64) -> BindingKey {
        self.slots.insert(Binding::Double(value))
    }

    /// Allocate an integer slot.
    pub fn integer(&mut self, value: i64) -> BindingKey {
        self.slots.insert(Binding::Integer(value))
    }

    /// Overwrite a double slot. Integer slots are converted to doubles.
    pub fn set(&mut self, key: BindingKey, value: f64) {
        if let Some(slot) = self.slots.get_mut(key) {
            *slot = Binding::Double(value);
        }
    }

    /// Overwrite an integer slot.
    pub fn set_integer(&mut self, key: BindingKey, value: i64) {
        if let Some(slot) = self.slots.get_mut(key) {
            *slot = Binding::Integer(value);
        }
    }

    #[must_use]
    pub fn get(&self, key: BindingKey) -> Option<Binding> {
        self.slots.get(key).copied()
    }

    /// Current numeric value of a slot, `NaN` for a removed slot.
    #[inline]
    #[must_use]
    pub fn value(&self, key: BindingKey) -> f64 {
        self.slots.get(key).map_or(f64::NAN, |b| b.value())
    }

    /// Remove a slot. Variables still pointing at it evaluate to `NaN`.
    pub fn remove(&mut self, key: BindingKey) -> Option<Binding> {
        self.slots.remove(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
