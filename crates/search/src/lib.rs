//! pipedash search: client-side text filtering and label-selector input handling.
//!
//! - [`tokenize`]: name decomposition (`raw`, `parts`, `joined`)
//! - [`fields`]: auxiliary searchable fields of a resource
//! - [`classify`]: label selector vs free text, active label filters
//! - [`filter`]: the text filter engine
//! - [`policy`]: which collections are text-filtered at all

#![forbid(unsafe_code)]

pub mod classify;
pub mod fields;
pub mod filter;
pub mod policy;
pub mod tokenize;

pub use classify::{classify, is_label_selector, LabelFilterError, LabelFilterSet, LabelPair, QueryKind, MAX_LABEL_VALUE_LEN};
pub use fields::{searchable_fields, FieldBag};
pub use filter::{filter_refs, filter_resources, matching_indices, TokenSet, NEGATION_MARKER};
pub use policy::FilterPolicy;
pub use tokenize::{name_index, NameIndex};
