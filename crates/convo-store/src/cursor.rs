/// A history request handed out by [`PaginationCursor::request_more`].
///
/// `generation` identifies the request: a response whose generation no
/// longer matches the cursor was abandoned and must not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub skip: usize,
    pub limit: usize,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    Start(PageRequest),
    AlreadyInFlight,
    NoMore,
}

/// What the UI should show at the top of the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    /// Last fetch failed; `request_more` retries from the same offset.
    Failed,
    Exhausted,
}

/// How far back a conversation's history has been loaded.
#[derive(Debug, Clone)]
pub struct PaginationCursor {
    page_size: usize,
    loaded_count: usize,
    has_more: bool,
    in_flight: bool,
    failed: bool,
    generation: u64,
}

impl PaginationCursor {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            loaded_count: 0,
            has_more: true,
            in_flight: false,
            failed: false,
            generation: 0,
        }
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded_count
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn load_state(&self) -> LoadState {
        if self.in_flight {
            LoadState::Loading
        } else if self.failed {
            LoadState::Failed
        } else if !self.has_more {
            LoadState::Exhausted
        } else {
            LoadState::Idle
        }
    }

    /// Start a request if none is outstanding and history remains.
    /// A second call while one is in flight is refused, not queued.
    pub fn request_more(&mut self) -> RequestDecision {
        if self.in_flight {
            return RequestDecision::AlreadyInFlight;
        }
        if !self.has_more {
            return RequestDecision::NoMore;
        }
        self.in_flight = true;
        self.generation += 1;
        RequestDecision::Start(PageRequest {
            skip: self.loaded_count,
            limit: self.page_size,
            generation: self.generation,
        })
    }

    /// Whether `request` is the one currently outstanding.
    pub fn is_current(&self, request: &PageRequest) -> bool {
        self.in_flight && request.generation == self.generation
    }

    /// Record a response of `page_len` raw items. Returns false (and changes
    /// nothing) if the request is stale.
    pub fn complete(&mut self, request: &PageRequest, page_len: usize) -> bool {
        if !self.is_current(request) {
            return false;
        }
        if page_len == 0 {
            self.has_more = false;
        } else {
            self.loaded_count += page_len;
        }
        self.in_flight = false;
        self.failed = false;
        true
    }

    /// Record a failed fetch, leaving the position untouched.
    pub fn fail(&mut self, request: &PageRequest) -> bool {
        if !self.is_current(request) {
            return false;
        }
        self.in_flight = false;
        self.failed = true;
        true
    }

    /// Forget the outstanding request; its response will be ignored.
    pub fn abandon(&mut self) {
        if self.in_flight {
            self.in_flight = false;
            self.generation += 1;
        }
    }

    /// Decide whether a viewport `proximity_to_top` away from the oldest
    /// loaded message should trigger the next page.
    pub fn should_load_more(&self, proximity_to_top: f64, threshold: f64) -> bool {
        proximity_to_top < threshold && self.has_more && !self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(decision: RequestDecision) -> PageRequest {
        match decision {
            RequestDecision::Start(req) => req,
            other => panic!("expected a started request, got {:?}", other),
        }
    }

    #[test]
    fn advances_by_page_length() {
        let mut c = PaginationCursor::new(10);
        let req = started(c.request_more());
        assert_eq!((req.skip, req.limit), (0, 10));
        assert!(c.complete(&req, 10));

        let req = started(c.request_more());
        assert_eq!(req.skip, 10);
        assert!(c.complete(&req, 4));
        assert_eq!(c.loaded_count(), 14);
        assert_eq!(c.load_state(), LoadState::Idle);
    }

    #[test]
    fn second_request_is_refused_while_in_flight() {
        let mut c = PaginationCursor::new(10);
        started(c.request_more());
        assert_eq!(c.request_more(), RequestDecision::AlreadyInFlight);
        assert_eq!(c.load_state(), LoadState::Loading);
    }

    #[test]
    fn empty_page_exhausts() {
        let mut c = PaginationCursor::new(10);
        let req = started(c.request_more());
        c.complete(&req, 0);
        assert!(!c.has_more());
        assert!(!c.in_flight());
        assert_eq!(c.request_more(), RequestDecision::NoMore);
        assert_eq!(c.request_more(), RequestDecision::NoMore);
        assert_eq!(c.load_state(), LoadState::Exhausted);
    }

    #[test]
    fn failure_keeps_position() {
        let mut c = PaginationCursor::new(10);
        let req = started(c.request_more());
        c.complete(&req, 10);

        let req = started(c.request_more());
        assert!(c.fail(&req));
        assert_eq!(c.load_state(), LoadState::Failed);
        assert_eq!(c.loaded_count(), 10);
        assert!(c.has_more());

        let retry = started(c.request_more());
        assert_eq!(retry.skip, 10);
    }

    #[test]
    fn abandoned_response_is_ignored() {
        let mut c = PaginationCursor::new(10);
        let req = started(c.request_more());
        c.abandon();
        assert!(!c.complete(&req, 10));
        assert_eq!(c.loaded_count(), 0);

        let next = started(c.request_more());
        assert_ne!(next.generation, req.generation);
        assert!(c.complete(&next, 3));
    }

    #[test]
    fn load_more_threshold() {
        let mut c = PaginationCursor::new(10);
        assert!(c.should_load_more(10.0, 50.0));
        assert!(!c.should_load_more(80.0, 50.0));
        started(c.request_more());
        assert!(!c.should_load_more(0.0, 50.0));
    }
}
