//! pipedash views: the shared query channel, filtered collection views and the filter
//! entry state machine.

#![forbid(unsafe_code)]

pub mod channel;
pub mod collection_view;
pub mod input;
pub mod page_state;
pub mod settings;

pub use channel::QueryChannel;
pub use collection_view::{CollectionView, FilteredList, ItemsView};
pub use input::{Debouncer, FilterInput, InputOutcome, InputState, Notice, Ticket};
pub use page_state::{FilePageState, MemoryPageState, NoPageState, PageState, PageStateError, QUERY_PARAM};
pub use settings::Settings;
