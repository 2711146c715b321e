//! Ordered fallback chains.
//!
//! Device creation, output duplication and window lookup all try a list of
//! strategies in order and keep the first one that works.

/// Every strategy failed, in the order they were tried.
#[derive(Debug)]
pub struct Exhausted<S, E> {
    pub failures: Vec<(S, E)>,
}

impl<S, E> Exhausted<S, E> {
    /// Consumes the chain and returns the error of the last strategy tried.
    #[must_use]
    pub fn into_last(self) -> Option<(S, E)> {
        self.failures.into_iter().last()
    }
}

/// Tries each strategy in order and returns the first success together with
/// the strategy that produced it.
pub fn first_success<S, T, E, F>(
    strategies: impl IntoIterator<Item = S>,
    mut attempt: F,
) -> Result<(S, T), Exhausted<S, E>>
where
    S: Copy,
    F: FnMut(S) -> Result<T, E>,
{
    let mut failures = Vec::new();

    for strategy in strategies {
        match attempt(strategy) {
            Ok(value) => return Ok((strategy, value)),
            Err(e) => failures.push((strategy, e)),
        }
    }

    Err(Exhausted { failures })
}

/// Orders `items` so the preferred ones come first, keeping the relative
/// order within both groups.
pub fn preferred_first<T>(items: impl IntoIterator<Item = T>, mut preferred: impl FnMut(&T) -> bool) -> Vec<T> {
    let (mut ordered, rest): (Vec<T>, Vec<T>) = items.into_iter().partition(|item| preferred(item));
    ordered.extend(rest);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_first_success() {
        let mut tried = Vec::new();
        let result = first_success([1, 2, 3], |s| {
            tried.push(s);
            if s >= 2 { Ok(s * 10) } else { Err("nope") }
        });

        assert_eq!(result.unwrap(), (2, 20));
        assert_eq!(tried, [1, 2], "strategy 3 must not run");
    }

    #[test]
    fn collects_failures_in_order() {
        let result: Result<(u8, ()), _> = first_success([1u8, 2, 3], |s| Err(s * 2));
        let exhausted = result.unwrap_err();

        assert_eq!(exhausted.failures, [(1, 2), (2, 4), (3, 6)]);
        assert_eq!(exhausted.into_last(), Some((3, 6)));
    }

    #[test]
    fn empty_chain_is_exhausted() {
        let result: Result<(u8, ()), Exhausted<u8, ()>> = first_success([], |_| Ok(()));
        assert!(result.unwrap_err().failures.is_empty());
    }

    #[test]
    fn preferred_items_lead_in_stable_order() {
        let ordered = preferred_first([0, 1, 2, 3, 4], |output| *output == 3);
        assert_eq!(ordered, [3, 0, 1, 2, 4]);

        let ordered = preferred_first([5, 6, 7], |_| false);
        assert_eq!(ordered, [5, 6, 7], "without a preferred item the order is unchanged");
    }
}
