// List response envelopes
//
// Storefront list endpoints answer with `{results, total}`, `{data}` or a bare
// array depending on the resource. The shape is resolved once here.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ListEnvelope<T> {
    /// `{"results": [...], "total": n}`
    Paginated {
        results: Vec<T>,
        #[serde(default)]
        total: Option<u64>,
    },
    /// `{"data": [...]}`
    Wrapped { data: Vec<T> },
    /// `[...]`
    Bare(Vec<T>),
}

impl<T> ListEnvelope<T> {
    /// Total reported by the server, or the number of items received
    pub fn total(&self) -> u64 {
        match self {
            ListEnvelope::Paginated {
                total: Some(total), ..
            } => *total,
            _ => self.len() as u64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ListEnvelope::Paginated { results, .. } => results.len(),
            ListEnvelope::Wrapped { data } => data.len(),
            ListEnvelope::Bare(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_items(self) -> Vec<T> {
        match self {
            ListEnvelope::Paginated { results, .. } => results,
            ListEnvelope::Wrapped { data } => data,
            ListEnvelope::Bare(items) => items,
        }
    }
}
