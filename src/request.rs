//! Per-request metadata accumulated while decoding header-phase packets
//! (§3 Request State).
use headers::PairList;
use packet::Method;
use iter::PairIter;

/// Everything the protocol engine knows about the current request,
/// before the application starts reading the body.
///
/// Reset to empty on every `accept()`; mutated only by the engine as it
/// consumes header-phase packets.
#[derive(Debug, Clone)]
pub struct RequestState {
    method: Method,
    uri: Vec<u8>,
    script_name: Vec<u8>,
    path_info: Vec<u8>,
    query_string: Vec<u8>,
    remote_host: Vec<u8>,
    headers: PairList,
    params: PairList,
    content_length: Option<u64>,
    want_metrics: bool,
}

impl RequestState {
    pub fn new() -> RequestState {
        RequestState {
            method: Method::default(),
            uri: Vec::new(),
            script_name: Vec::new(),
            path_info: Vec::new(),
            query_string: Vec::new(),
            remote_host: Vec::new(),
            headers: PairList::new(),
            params: PairList::new(),
            content_length: None,
            want_metrics: false,
        }
    }

    /// Reset to a pristine state for the next accepted request.
    pub fn reset(&mut self) {
        self.method = Method::default();
        self.uri.clear();
        self.script_name.clear();
        self.path_info.clear();
        self.query_string.clear();
        self.remote_host.clear();
        self.headers.clear();
        self.params.clear();
        self.content_length = None;
        self.want_metrics = false;
    }

    pub fn set_method(&mut self, m: Method) { self.method = m; }
    pub fn set_uri(&mut self, v: Vec<u8>) { self.uri = v; }
    pub fn set_script_name(&mut self, v: Vec<u8>) { self.script_name = v; }
    pub fn set_path_info(&mut self, v: Vec<u8>) { self.path_info = v; }
    pub fn set_query_string(&mut self, v: Vec<u8>) { self.query_string = v; }
    pub fn set_remote_host(&mut self, v: Vec<u8>) { self.remote_host = v; }
    pub fn set_content_length(&mut self, n: u64) { self.content_length = Some(n); }
    pub fn set_want_metrics(&mut self) { self.want_metrics = true; }
    pub fn add_header(&mut self, name: Vec<u8>, value: Vec<u8>) {
        self.headers.push(name, value);
    }
    pub fn add_parameter(&mut self, name: Vec<u8>, value: Vec<u8>) {
        self.params.push(name, value);
    }

    pub fn method(&self) -> Method { self.method }
    pub fn uri(&self) -> &[u8] { &self.uri }
    pub fn script_name(&self) -> &[u8] { &self.script_name }
    pub fn path_info(&self) -> &[u8] { &self.path_info }
    pub fn query_string(&self) -> &[u8] { &self.query_string }
    pub fn remote_host(&self) -> &[u8] { &self.remote_host }
    pub fn content_length(&self) -> Option<u64> { self.content_length }
    pub fn want_metrics(&self) -> bool { self.want_metrics }

    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get_ci(name)
    }
    pub fn multi_header<'a>(&'a self, name: &[u8]) -> PairIter<'a> {
        PairIter::matching_ci(self.headers.as_slice(), name)
    }
    pub fn header_iter<'a>(&'a self) -> PairIter<'a> {
        PairIter::all(self.headers.as_slice())
    }
    pub fn parameter(&self, name: &[u8]) -> Option<&[u8]> {
        self.params.get_exact(name)
    }
    pub fn parameter_iter<'a>(&'a self) -> PairIter<'a> {
        PairIter::all(self.params.as_slice())
    }

    pub fn headers(&self) -> &PairList { &self.headers }
    pub fn params(&self) -> &PairList { &self.params }
}

impl Default for RequestState {
    fn default() -> RequestState { RequestState::new() }
}
