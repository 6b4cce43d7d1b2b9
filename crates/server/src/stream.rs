use std::convert::Infallible;

use bytes::Bytes;
use futures::stream::Stream;
use histwatch_index::SharedIndex;

/// Descending walk over the index from a pre-captured horizon.
///
/// Pull-based on purpose: each chunk the client reads costs exactly one
/// shared-lock acquisition and one `at_or_below` lookup, and a disconnected
/// client simply stops polling (hyper drops the stream). Touches that land
/// between two steps can only vacate ranks the walk has not reached yet;
/// the lookup skips those silently.
pub(crate) fn rank_walk(
    index: SharedIndex,
    start: u64,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    futures::stream::unfold(start, move |cursor| {
        let index = index.clone();
        async move {
            let entry = {
                let guard = index.read();
                guard
                    .at_or_below(cursor)
                    .map(|(rank, key)| (rank, format!("{key}\n")))
            };
            entry.map(|(rank, line)| (Ok(Bytes::from(line)), rank - 1))
        }
    })
}
