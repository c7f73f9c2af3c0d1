//! "What appeared that wasn't there before"

use std::collections::HashSet;
use std::hash::Hash;

/// Items of `after` that are absent from `before`
///
/// Duplicates collapse and the result is sorted so that reports are stable
/// across runs.
///
/// # Example
/// ```
/// use leakcheck::set_diff::set_minus;
///
/// assert_eq!(set_minus(&[3, 1, 4, 1, 5], &[1, 5]), vec![3, 4]);
/// ```
pub fn set_minus<T>(after: &[T], before: &[T]) -> Vec<T>
where
    T: Ord + Hash + Clone,
{
    let before: HashSet<&T> = before.iter().collect();
    let mut appeared: Vec<T> = after
        .iter()
        .filter(|item| !before.contains(item))
        .cloned()
        .collect();
    appeared.sort();
    appeared.dedup();
    appeared
}
