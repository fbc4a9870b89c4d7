//! Cursor-based pagination for `resources/list`, `resources/templates/list`,
//! and `prompts/list` (spec.md §4.7). A cursor is a base64-JSON `{offset}`
//! object; concatenating all pages reproduces the source slice exactly.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use mcpgate_core::{GateError, GateResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Cursor {
    offset: usize,
}

/// Encode an offset as an opaque pagination cursor.
pub fn encode_cursor(offset: usize) -> String {
    let json = serde_json::to_vec(&Cursor { offset }).expect("cursor serializes");
    STANDARD_NO_PAD.encode(json)
}

/// Decode a pagination cursor back to an offset.
pub fn decode_cursor(cursor: &str) -> GateResult<usize> {
    let bytes = STANDARD_NO_PAD
        .decode(cursor)
        .map_err(|e| GateError::invalid_params(format!("invalid cursor: {e}")))?;
    let parsed: Cursor =
        serde_json::from_slice(&bytes).map_err(|e| GateError::invalid_params(format!("invalid cursor: {e}")))?;
    Ok(parsed.offset)
}

/// A single page of results plus the cursor for the next page, if any.
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Paginate a slice starting at an optional cursor, `limit` items per page.
/// Concatenating every page (following `next_cursor` until `None`)
/// reproduces `items` exactly, in order.
pub fn paginate_array<T: Clone>(items: &[T], cursor: Option<&str>, limit: usize) -> GateResult<Page<T>> {
    let offset = match cursor {
        Some(c) => decode_cursor(c)?,
        None => 0,
    };
    if offset > items.len() {
        return Err(GateError::invalid_params("cursor out of range"));
    }
    let end = (offset + limit).min(items.len());
    let page = items[offset..end].to_vec();
    let next_cursor = if end < items.len() {
        Some(encode_cursor(end))
    } else {
        None
    };
    Ok(Page {
        items: page,
        next_cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let c = encode_cursor(42);
        assert_eq!(decode_cursor(&c).unwrap(), 42);
    }

    #[test]
    fn pages_concatenate_to_source() {
        let items: Vec<i32> = (0..237).collect();
        let mut cursor: Option<String> = None;
        let mut collected = Vec::new();
        loop {
            let page = paginate_array(&items, cursor.as_deref(), 50).unwrap();
            collected.extend(page.items);
            match page.next_cursor {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        assert_eq!(collected, items);
    }

    #[test]
    fn empty_slice_yields_empty_page_no_cursor() {
        let items: Vec<i32> = vec![];
        let page = paginate_array(&items, None, 50).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn cursor_past_end_errors() {
        let items = vec![1, 2, 3];
        assert!(paginate_array(&items, Some(&encode_cursor(100)), 10).is_err());
    }

    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_cursor_round_trips(offset in 0usize..100_000) {
            prop_assert_eq!(decode_cursor(&encode_cursor(offset)).unwrap(), offset);
        }

        /// Concatenating every page, following `next_cursor` until `None`,
        /// reproduces the source slice exactly, for any length/page size.
        #[test]
        fn prop_pages_concatenate_to_source(len in 0usize..300, limit in 1usize..64) {
            let items: Vec<usize> = (0..len).collect();
            let mut cursor: Option<String> = None;
            let mut collected = Vec::new();
            loop {
                let page = paginate_array(&items, cursor.as_deref(), limit).unwrap();
                collected.extend(page.items);
                match page.next_cursor {
                    Some(c) => cursor = Some(c),
                    None => break,
                }
            }
            prop_assert_eq!(collected, items);
        }

        #[test]
        fn prop_page_never_exceeds_limit(len in 0usize..300, limit in 1usize..64) {
            let items: Vec<usize> = (0..len).collect();
            let page = paginate_array(&items, None, limit).unwrap();
            prop_assert!(page.items.len() <= limit);
        }
    }
}
