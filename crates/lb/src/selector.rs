// Interleaved weighted round-robin selection
use std::sync::{Mutex, MutexGuard, PoisonError};

struct WeightedCandidate<T> {
    item: T,
    weight: i64,
}

struct Cursor<T> {
    candidates: Vec<WeightedCandidate<T>>,
    // None until the first pick after (re)registration
    index: Option<usize>,
    current_weight: i64,
    max_weight: i64,
    gcd_weight: i64,
}

/// Hands out candidates in proportion to their weight, spreading the picks of
/// each candidate as evenly as possible across a cycle.
///
/// Weights `{A: 1, B: 1, C: 2}` yield the repeating sequence `C, A, B, C`.
/// All callers share one cursor, so concurrent `next` calls interleave into a
/// single global sequence.
pub struct WeightedSelector<T> {
    cursor: Mutex<Cursor<T>>,
}

impl<T: Clone> WeightedSelector<T> {
    pub fn new() -> Self {
        Self {
            cursor: Mutex::new(Cursor {
                candidates: Vec::new(),
                index: None,
                current_weight: 0,
                max_weight: 0,
                gcd_weight: 0,
            }),
        }
    }

    /// Adds a candidate and restarts the sequence. Negative weights are
    /// rejected; a zero weight is kept but never picked.
    pub fn register(&self, item: T, weight: i64) -> bool {
        if weight < 0 {
            return false;
        }

        let mut cursor = self.lock();
        cursor.candidates.push(WeightedCandidate { item, weight });
        cursor.max_weight = cursor.max_weight.max(weight);
        cursor.gcd_weight = gcd(cursor.gcd_weight, weight);
        cursor.index = None;
        cursor.current_weight = 0;
        true
    }

    /// Returns the next candidate, or `None` when nothing is registered or
    /// every weight is zero.
    pub fn next(&self) -> Option<T> {
        let mut guard = self.lock();
        let cursor = &mut *guard;
        let len = cursor.candidates.len();
        if len == 0 {
            return None;
        }

        loop {
            let index = match cursor.index {
                Some(prev) => (prev + 1) % len,
                None => 0,
            };
            cursor.index = Some(index);

            if index == 0 {
                cursor.current_weight -= cursor.gcd_weight;
                if cursor.current_weight <= 0 {
                    cursor.current_weight = cursor.max_weight;
                    if cursor.current_weight == 0 {
                        return None;
                    }
                }
            }

            let candidate = &cursor.candidates[index];
            if candidate.weight >= cursor.current_weight {
                return Some(candidate.item.clone());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().candidates.is_empty()
    }

    /// Number of candidates that can ever be picked (non-zero weight).
    pub fn selectable(&self) -> usize {
        self.lock()
            .candidates
            .iter()
            .filter(|candidate| candidate.weight > 0)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Cursor<T>> {
        // every critical section leaves the cursor consistent
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Default for WeightedSelector<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 { a } else { gcd(b, a % b) }
}
