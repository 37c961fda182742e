use std::cmp::Ordering;
use std::num::NonZeroUsize;
use std::thread;

/// Below this length the slice is sorted on the calling thread.
const MIN_PARALLEL_LEN: usize = 1024;

/// Stable sort that fans the work out over scoped threads.
///
/// The slice is split into one run per worker, runs are sorted in parallel,
/// then adjacent runs are merged pairwise (again in parallel) until a single
/// run remains. The result equals `items.sort_by(compare)`.
pub fn parallel_sort_by<T, F>(items: &mut [T], compare: F)
where
    T: Copy + Send + Sync,
    F: Fn(&T, &T) -> Ordering + Sync,
{
    let workers = thread::available_parallelism().map_or(1, NonZeroUsize::get);
    parallel_sort_with_workers(items, workers, compare);
}

fn parallel_sort_with_workers<T, F>(items: &mut [T], workers: usize, compare: F)
where
    T: Copy + Send + Sync,
    F: Fn(&T, &T) -> Ordering + Sync,
{
    let len = items.len();
    if workers < 2 || len < MIN_PARALLEL_LEN {
        items.sort_by(compare);
        return;
    }

    let run = len.div_ceil(workers);
    let compare = &compare;
    thread::scope(|scope| {
        for chunk in items.chunks_mut(run) {
            scope.spawn(move || chunk.sort_by(compare));
        }
    });

    let mut scratch = items.to_vec();
    let mut width = run;
    while width < len {
        let source: &[T] = items;
        thread::scope(|scope| {
            for (pair, out) in source.chunks(width * 2).zip(scratch.chunks_mut(width * 2)) {
                scope.spawn(move || {
                    let middle = width.min(pair.len());
                    merge(&pair[..middle], &pair[middle..], out, compare);
                });
            }
        });
        items.copy_from_slice(&scratch);
        width *= 2;
    }
}

fn merge<T: Copy, F>(left: &[T], right: &[T], out: &mut [T], compare: &F)
where
    F: Fn(&T, &T) -> Ordering,
{
    let (mut i, mut j) = (0, 0);
    for slot in out.iter_mut() {
        let take_right = j < right.len()
            && (i == left.len() || compare(&right[j], &left[i]) == Ordering::Less);
        if take_right {
            *slot = right[j];
            j += 1;
        } else {
            *slot = left[i];
            i += 1;
        }
    }
}
