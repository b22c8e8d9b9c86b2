/// Split a slice into consecutive chunks of at most `batch_size` items.
///
/// The final chunk carries the remainder.
pub fn create_batches<T: Clone>(items: &[T], batch_size: usize) -> Vec<Vec<T>> {
    if batch_size == 0 {
        return vec![items.to_vec()];
    }
    items.chunks(batch_size).map(<[T]>::to_vec).collect()
}
