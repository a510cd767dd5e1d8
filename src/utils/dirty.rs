//! Lazily derived values.
//!
//! [`Dirty<T>`] pairs a cached value with a valid bit. Readers either get the
//! cached value when it is valid, or supply the recompute function at the
//! point of reading, so a stale value can never be observed through
//! [`Dirty::get`].

/// A cached derived value plus the bit saying whether it is current.
#[derive(Debug, Clone, Copy)]
pub struct Dirty<T> {
    value: T,
    valid: bool,
}

impl<T> Dirty<T> {
    /// Wraps a value that is already current.
    #[inline]
    #[must_use]
    pub const fn valid(value: T) -> Self {
        Self { value, valid: true }
    }

    /// Wraps a placeholder that must be recomputed before first use.
    #[inline]
    #[must_use]
    pub const fn stale(placeholder: T) -> Self {
        Self {
            value: placeholder,
            valid: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Marks the cached value as out of date.
    #[inline]
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Returns the cached value only if it is current.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.valid.then_some(&self.value)
    }

    /// Stores a freshly computed value and marks it current.
    #[inline]
    pub fn set(&mut self, value: T) {
        self.value = value;
        self.valid = true;
    }

    /// Returns the current value, recomputing it first if stale.
    ///
    /// The boolean is `true` when `recompute` ran.
    pub fn get_or_update(&mut self, recompute: impl FnOnce() -> T) -> (&T, bool) {
        let recomputed = !self.valid;
        if recomputed {
            self.value = recompute();
            self.valid = true;
        }
        (&self.value, recomputed)
    }

    /// Fallible variant of [`get_or_update`](Self::get_or_update). On error
    /// the value stays stale.
    pub fn try_get_or_update<E>(
        &mut self,
        recompute: impl FnOnce() -> Result<T, E>,
    ) -> Result<&T, E> {
        if !self.valid {
            self.value = recompute()?;
            self.valid = true;
        }
        Ok(&self.value)
    }

    /// Last stored value, regardless of validity.
    ///
    /// Only for callers that knowingly tolerate staleness (debug views).
    #[inline]
    #[must_use]
    pub fn last_value(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_value_is_hidden() {
        let d = Dirty::stale(0u32);
        assert!(d.get().is_none());
        assert_eq!(*d.last_value(), 0);
    }

    #[test]
    fn recompute_runs_once_until_invalidated() {
        let mut d = Dirty::stale(0u32);
        let mut calls = 0;

        let (v, recomputed) = d.get_or_update(|| {
            calls += 1;
            7
        });
        assert_eq!((*v, recomputed), (7, true));

        let (v, recomputed) = d.get_or_update(|| {
            calls += 1;
            8
        });
        assert_eq!((*v, recomputed), (7, false));
        assert_eq!(calls, 1);

        d.invalidate();
        let (v, _) = d.get_or_update(|| 9);
        assert_eq!(*v, 9);
    }

    #[test]
    fn failed_recompute_leaves_value_stale() {
        let mut d = Dirty::stale(1i32);
        let r: Result<&i32, &str> = d.try_get_or_update(|| Err("nope"));
        assert!(r.is_err());
        assert!(!d.is_valid());
    }
}
