/// Messages requested per history page.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Seen receipts held while their message has not materialized locally.
/// The oldest pending receipt is evicted once the buffer is full.
pub const DEFAULT_SEEN_BUFFER_CAPACITY: usize = 64;

/// Age limit of a buffered receipt, counted in inserts into the receipt's
/// own conversation set (not wall-clock time, not appearances of the
/// conversation). A receipt whose message shows up within that many inserts
/// is still applied; one whose message never arrives is dropped without
/// retry. A larger value tolerates longer reorderings at the cost of holding
/// dead receipts longer.
pub const DEFAULT_SEEN_BUFFER_MAX_AGE: u32 = 256;

/// Distance from the top of the loaded history (in viewport units) under
/// which the next page should be requested.
pub const DEFAULT_LOAD_MORE_THRESHOLD: f64 = 50.0;

pub const ATTACHMENT_PLACEHOLDER: &str = "Attachment";
pub const EMPTY_PREVIEW: &str = "No messages yet";
pub const DEFAULT_AVATAR: &str = "/avatars/default.jpg";

/// Summaries show at most this many avatars.
pub const MAX_AVATAR_REFS: usize = 3;

/// Live message ids remembered per conversation so a re-delivered event
/// touches the sidebar once.
pub const RECENT_LIVE_IDS: usize = 32;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub page_size: usize,
    pub seen_buffer_capacity: usize,
    pub seen_buffer_max_age: u32,
    pub load_more_threshold: f64,
    pub attachment_placeholder: String,
    pub empty_preview: String,
    pub default_avatar: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            seen_buffer_capacity: DEFAULT_SEEN_BUFFER_CAPACITY,
            seen_buffer_max_age: DEFAULT_SEEN_BUFFER_MAX_AGE,
            load_more_threshold: DEFAULT_LOAD_MORE_THRESHOLD,
            attachment_placeholder: ATTACHMENT_PLACEHOLDER.into(),
            empty_preview: EMPTY_PREVIEW.into(),
            default_avatar: DEFAULT_AVATAR.into(),
        }
    }
}
