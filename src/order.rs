use std::{fmt, num::NonZeroUsize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch<T> {
    Length { expected: usize, observed: usize },
    /// `missing`, expected in window `window`, was not observed there.
    Window { window: usize, missing: T, observed: Vec<T> },
}

impl<T: fmt::Debug> fmt::Display for Mismatch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Length { expected, observed } => {
                write!(f, "expected {expected} updates, observed {observed}")
            }
            Mismatch::Window {
                window,
                missing,
                observed,
            } => write!(
                f,
                "{missing:?} expected in update batch {window}, observed {observed:?}"
            ),
        }
    }
}

/// Whether each window of `step` expected items was updated within the
/// observed window at the same index. Order inside a window is free.
pub fn verify<T: PartialEq>(expected: &[T], observed: &[T], step: NonZeroUsize) -> bool {
    expected.len() == observed.len()
        && expected
            .chunks(step.get())
            .zip(observed.chunks(step.get()))
            .all(|(expected, observed)| expected.iter().all(|item| observed.contains(item)))
}

/// Like [`verify`], but describes the first violation found.
pub fn first_mismatch<T: PartialEq + Clone>(
    expected: &[T],
    observed: &[T],
    step: NonZeroUsize,
) -> Option<Mismatch<T>> {
    if expected.len() != observed.len() {
        return Some(Mismatch::Length {
            expected: expected.len(),
            observed: observed.len(),
        });
    }

    expected
        .chunks(step.get())
        .zip(observed.chunks(step.get()))
        .enumerate()
        .find_map(|(window, (expected, observed))| {
            expected
                .iter()
                .find(|item| !observed.contains(item))
                .map(|missing| Mismatch::Window {
                    window,
                    missing: missing.clone(),
                    observed: observed.to_vec(),
                })
        })
}
