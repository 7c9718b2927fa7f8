//! Comparators for ordered trees.
//!
//! Sorted sets and maps do not require `Ord` on their values; they take a
//! [`Comparator`] instead. Plain closures of the form `Fn(&T, &T) -> Ordering`
//! are comparators too.

use core::cmp::Ordering;

/// A total order over values.
pub trait Comparator<K> {
    /// Compares two values.
    fn compare(&self, a: &K, b: &K) -> Ordering;

    /// Returns true if a < b according to this comparator.
    fn is_less(&self, a: &K, b: &K) -> bool {
        self.compare(a, b) == Ordering::Less
    }

    /// Returns true if a > b according to this comparator.
    fn is_greater(&self, a: &K, b: &K) -> bool {
        self.compare(a, b) == Ordering::Greater
    }

    /// Returns true if a == b according to this comparator.
    fn is_equal(&self, a: &K, b: &K) -> bool {
        self.compare(a, b) == Ordering::Equal
    }
}

impl<K, F> Comparator<K> for F
where
    F: Fn(&K, &K) -> Ordering,
{
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        self(a, b)
    }
}

/// Natural order of `Ord` values, ascending or descending.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimpleComparator {
    descending: bool,
}

impl SimpleComparator {
    pub fn asc() -> Self {
        Self { descending: false }
    }

    pub fn desc() -> Self {
        Self { descending: true }
    }
}

impl<K: Ord> Comparator<K> for SimpleComparator {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        let ord = a.cmp(b);
        if self.descending {
            ord.reverse()
        } else {
            ord
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_comparator() {
        let asc = SimpleComparator::asc();
        assert_eq!(asc.compare(&1, &2), Ordering::Less);
        assert!(asc.is_equal(&3, &3));

        let desc = SimpleComparator::desc();
        assert_eq!(desc.compare(&1, &2), Ordering::Greater);
        assert!(desc.is_less(&"b", &"a"));
    }

    #[test]
    fn test_closure_comparator() {
        let by_abs = |a: &i32, b: &i32| a.abs().cmp(&b.abs());
        assert!(by_abs.is_less(&-1, &2));
        assert!(by_abs.is_equal(&-3, &3));
    }
}
