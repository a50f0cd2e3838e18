//! IPC protocol types for search requests and responses.
//!
//! Requests and replies travel as compact little-endian binary frames (see
//! [`crate::ipc::codec`]). This module holds the wire constants and the typed
//! values on either side of the codec.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{QixError, Result};

/// Window class the indexing service registers its IPC endpoint under.
/// Named instances append `_(<instance>)`.
pub const DEFAULT_ENDPOINT_CLASS: &str = "QIX_INDEX_SERVICE";

/// Protocol version written into every request and expected in every reply.
pub const PROTOCOL_VERSION: u16 = 2;

/// Default time to wait for a reply (3 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default number of records requested per query.
pub const DEFAULT_MAX_RESULTS: u32 = 100;

/// Longest accepted query text, in characters.
pub const MAX_QUERY_CHARS: usize = 32 * 1024;

/// Size of the fixed request header in bytes.
pub const REQUEST_HEADER_LEN: usize = 30;

/// Size of the fixed reply header in bytes.
pub const REPLY_HEADER_LEN: usize = 30;

/// Size of one record descriptor in a reply.
pub const RECORD_DESCRIPTOR_LEN: usize = 116;

/// Sanity limit for reply buffers: reject anything over 64MB.
pub const MAX_REPLY_SIZE: usize = 64 * 1024 * 1024;

/// `COPYDATASTRUCT::dwData` tag carried by query messages.
pub const COPYDATA_QUERY: usize = 0x5158_0002;

/// `COPYDATASTRUCT::dwData` tag carried by reply messages.
pub const COPYDATA_REPLY: usize = 0x5158_8002;

/// Scalar commands sent as `WM_USER` messages (command in wParam).
pub mod command {
    pub const GET_MAJOR_VERSION: u32 = 0;
    pub const GET_MINOR_VERSION: u32 = 1;
    pub const GET_REVISION: u32 = 2;
    pub const GET_BUILD_NUMBER: u32 = 3;
    pub const GET_TARGET_MACHINE: u32 = 5;
    pub const IS_DB_LOADED: u32 = 401;
    pub const IS_FIELD_INDEXED: u32 = 411;
}

/// Bits of the request `flags` word that are not match options.
pub mod wire_flags {
    /// Sort direction: descending when set.
    pub const SORT_DESCENDING: u32 = 0x0000_0080;
    /// Sort field code lives in bits 8..16.
    pub const SORT_FIELD_SHIFT: u32 = 8;
    pub const SORT_FIELD_MASK: u32 = 0x0000_FF00;
    /// Query text and string table are UTF-16LE when set, UTF-8 otherwise.
    pub const WIDE_TEXT: u32 = 0x0001_0000;
}

/// Item flags in a record descriptor.
pub mod item_flags {
    pub const FOLDER: u32 = 0x0000_0001;
    pub const DRIVE: u32 = 0x0000_0002;
}

bitflags::bitflags! {
    /// Match options for a search.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SearchFlags: u32 {
        const MATCH_CASE = 0x0000_0001;
        const MATCH_WHOLE_WORD = 0x0000_0002;
        /// Match against the full path instead of the name only
        const MATCH_PATH = 0x0000_0004;
        const REGEX = 0x0000_0008;
        /// Diacritics are significant
        const MATCH_ACCENTS = 0x0000_0010;
    }
}

bitflags::bitflags! {
    /// Output fields requested for every result record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ResultFields: u32 {
        const NAME = 0x0000_0001;
        /// Parent directory of the item
        const PATH = 0x0000_0002;
        /// Full path as the service formats it
        const FULL_PATH_AND_NAME = 0x0000_0004;
        const EXTENSION = 0x0000_0008;
        const SIZE = 0x0000_0010;
        const DATE_CREATED = 0x0000_0020;
        const DATE_MODIFIED = 0x0000_0040;
        const DATE_ACCESSED = 0x0000_0080;
        const ATTRIBUTES = 0x0000_0100;
        /// Times the item was opened through the service
        const RUN_COUNT = 0x0000_0400;
        const DATE_RUN = 0x0000_0800;
        const DATE_RECENTLY_CHANGED = 0x0000_1000;
        /// Name with `*`-delimited highlight markup
        const HIGHLIGHTED_NAME = 0x0000_2000;
        const HIGHLIGHTED_PATH = 0x0000_4000;
        const HIGHLIGHTED_FULL_PATH_AND_NAME = 0x0000_8000;

        /// Name and parent directory, enough to build the full path.
        const FULL_PATH = Self::NAME.bits() | Self::PATH.bits();
    }
}

impl ResultFields {
    /// Parse a field name as used in config files and on the command line.
    pub fn parse_name(name: &str) -> Option<Self> {
        let field = match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "name" => Self::NAME,
            "path" => Self::PATH,
            "full_path" | "fullpath" => Self::FULL_PATH,
            "full_path_and_name" => Self::FULL_PATH_AND_NAME,
            "ext" | "extension" => Self::EXTENSION,
            "size" => Self::SIZE,
            "created" | "date_created" => Self::DATE_CREATED,
            "modified" | "date_modified" => Self::DATE_MODIFIED,
            "accessed" | "date_accessed" => Self::DATE_ACCESSED,
            "attributes" | "attrs" => Self::ATTRIBUTES,
            "run_count" => Self::RUN_COUNT,
            "run" | "date_run" => Self::DATE_RUN,
            "recently_changed" | "date_recently_changed" => Self::DATE_RECENTLY_CHANGED,
            "highlight" | "highlights" | "highlighted_name" => Self::HIGHLIGHTED_NAME,
            "highlighted_path" => Self::HIGHLIGHTED_PATH,
            "highlighted_full_path" | "highlighted_full_path_and_name" => {
                Self::HIGHLIGHTED_FULL_PATH_AND_NAME
            }
            _ => return None,
        };
        Some(field)
    }

    /// Parse a list of field names, failing on the first unknown one.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut fields = Self::empty();
        for name in names {
            let name = name.as_ref();
            fields |= Self::parse_name(name)
                .ok_or_else(|| QixError::InvalidArgument(format!("Unknown result field '{}'", name)))?;
        }
        Ok(fields)
    }
}

/// Field the service sorts results by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Name,
    Path,
    Size,
    Extension,
    /// Type name as shown by the shell (e.g. "Text Document")
    TypeName,
    DateCreated,
    DateModified,
    Attributes,
    RunCount,
    DateRecentlyChanged,
    DateAccessed,
    DateRun,
}

impl SortField {
    pub const ALL: [SortField; 12] = [
        SortField::Name,
        SortField::Path,
        SortField::Size,
        SortField::Extension,
        SortField::TypeName,
        SortField::DateCreated,
        SortField::DateModified,
        SortField::Attributes,
        SortField::RunCount,
        SortField::DateRecentlyChanged,
        SortField::DateAccessed,
        SortField::DateRun,
    ];

    /// Code stored in bits 8..16 of the request flags.
    pub fn code(self) -> u8 {
        match self {
            SortField::Name => 1,
            SortField::Path => 2,
            SortField::Size => 3,
            SortField::Extension => 4,
            SortField::DateCreated => 5,
            SortField::DateModified => 6,
            SortField::TypeName => 7,
            SortField::Attributes => 8,
            SortField::RunCount => 9,
            SortField::DateRecentlyChanged => 10,
            SortField::DateAccessed => 11,
            SortField::DateRun => 12,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.code() == code)
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "name" => Ok(SortField::Name),
            "path" => Ok(SortField::Path),
            "size" => Ok(SortField::Size),
            "ext" | "extension" => Ok(SortField::Extension),
            "type" | "type_name" => Ok(SortField::TypeName),
            "created" | "date_created" => Ok(SortField::DateCreated),
            "modified" | "date_modified" => Ok(SortField::DateModified),
            "attributes" | "attrs" => Ok(SortField::Attributes),
            "run_count" => Ok(SortField::RunCount),
            "recently_changed" | "date_recently_changed" => Ok(SortField::DateRecentlyChanged),
            "accessed" | "date_accessed" => Ok(SortField::DateAccessed),
            "run" | "date_run" => Ok(SortField::DateRun),
            _ => Err(format!("unknown sort field '{}'", s)),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Character width of the query text and reply string table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    /// UTF-8
    Narrow,
    /// UTF-16LE, the native width of the window-message channel
    #[default]
    Wide,
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Allocate a correlation token unique within this process and unlikely to
/// collide with tokens of other client processes.
pub fn next_correlation_token() -> u64 {
    let seq = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    let token = (u64::from(std::process::id()) << 32) ^ seq;
    if token == 0 {
        1
    } else {
        token
    }
}

/// A validated search query. Fields are private: every instance went through
/// [`SearchRequestBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    text: String,
    flags: SearchFlags,
    sort_field: SortField,
    sort_direction: SortDirection,
    offset: u32,
    max_count: u32,
    fields: ResultFields,
    encoding: TextEncoding,
    timeout: Duration,
    token: u64,
}

impl SearchRequest {
    /// Start building a request for `text`.
    pub fn builder(text: impl Into<String>) -> SearchRequestBuilder {
        SearchRequestBuilder::new(text)
    }

    /// Request with default options: sort by name, first
    /// [`DEFAULT_MAX_RESULTS`] records, full path fields.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        Self::builder(text).build()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn flags(&self) -> SearchFlags {
        self.flags
    }

    pub fn sort_field(&self) -> SortField {
        self.sort_field
    }

    pub fn sort_direction(&self) -> SortDirection {
        self.sort_direction
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn max_count(&self) -> u32 {
        self.max_count
    }

    pub fn fields(&self) -> ResultFields {
        self.fields
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Token the reply must echo.
    pub fn correlation_token(&self) -> u64 {
        self.token
    }

    /// Full request `flags` word: match options, sort and text width.
    pub fn wire_flags(&self) -> u32 {
        let mut flags = self.flags.bits();
        if self.sort_direction == SortDirection::Descending {
            flags |= wire_flags::SORT_DESCENDING;
        }
        flags |= u32::from(self.sort_field.code()) << wire_flags::SORT_FIELD_SHIFT;
        if self.encoding == TextEncoding::Wide {
            flags |= wire_flags::WIDE_TEXT;
        }
        flags
    }
}

/// Builder for [`SearchRequest`].
#[derive(Debug, Clone)]
pub struct SearchRequestBuilder {
    text: String,
    flags: SearchFlags,
    sort_field: SortField,
    sort_direction: SortDirection,
    offset: u32,
    max_count: u32,
    fields: ResultFields,
    encoding: TextEncoding,
    timeout: Duration,
    token: Option<u64>,
}

impl SearchRequestBuilder {
    fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            flags: SearchFlags::empty(),
            sort_field: SortField::Name,
            sort_direction: SortDirection::Ascending,
            offset: 0,
            max_count: DEFAULT_MAX_RESULTS,
            fields: ResultFields::FULL_PATH,
            encoding: TextEncoding::Wide,
            timeout: DEFAULT_TIMEOUT,
            token: None,
        }
    }

    pub fn match_case(mut self, on: bool) -> Self {
        self.flags.set(SearchFlags::MATCH_CASE, on);
        self
    }

    pub fn whole_word(mut self, on: bool) -> Self {
        self.flags.set(SearchFlags::MATCH_WHOLE_WORD, on);
        self
    }

    pub fn match_path(mut self, on: bool) -> Self {
        self.flags.set(SearchFlags::MATCH_PATH, on);
        self
    }

    pub fn regex(mut self, on: bool) -> Self {
        self.flags.set(SearchFlags::REGEX, on);
        self
    }

    pub fn match_accents(mut self, on: bool) -> Self {
        self.flags.set(SearchFlags::MATCH_ACCENTS, on);
        self
    }

    /// Replace all match options at once.
    pub fn flags(mut self, flags: SearchFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn sort(mut self, field: SortField, direction: SortDirection) -> Self {
        self.sort_field = field;
        self.sort_direction = direction;
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn max_count(mut self, max_count: u32) -> Self {
        self.max_count = max_count;
        self
    }

    pub fn fields(mut self, fields: ResultFields) -> Self {
        self.fields = fields;
        self
    }

    pub fn encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pin the correlation token instead of allocating a fresh one.
    pub fn correlation_token(mut self, token: u64) -> Self {
        self.token = Some(token);
        self
    }

    /// Validate and freeze the request.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for anything the service could not be sent.
    pub fn build(self) -> Result<SearchRequest> {
        let invalid = |msg: String| -> Result<SearchRequest> { Err(QixError::InvalidArgument(msg)) };

        let chars = self.text.chars().count();
        if chars > MAX_QUERY_CHARS {
            return invalid(format!(
                "Query too long: {} characters (max {})",
                chars, MAX_QUERY_CHARS
            ));
        }
        if self.text.contains('\0') {
            return invalid("Query text contains a NUL character".to_string());
        }
        if self.max_count == 0 {
            return invalid("max_count must be at least 1".to_string());
        }
        if self.offset.checked_add(self.max_count).is_none() {
            return invalid(format!(
                "offset {} + max_count {} overflows the 32-bit window",
                self.offset, self.max_count
            ));
        }
        if self.fields.is_empty() {
            return invalid("At least one result field must be requested".to_string());
        }
        if self.timeout.is_zero() {
            return invalid("Timeout must be greater than zero".to_string());
        }
        if self.token == Some(0) {
            return invalid("Correlation token 0 is reserved".to_string());
        }

        Ok(SearchRequest {
            text: self.text,
            flags: self.flags,
            sort_field: self.sort_field,
            sort_direction: self.sort_direction,
            offset: self.offset,
            max_count: self.max_count,
            fields: self.fields,
            encoding: self.encoding,
            timeout: self.timeout,
            token: self.token.unwrap_or_else(next_correlation_token),
        })
    }
}

/// Request parameters echoed by the service, kept for correlation checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EchoedParams {
    pub protocol_version: u16,
    pub correlation_token: u64,
    /// Offset of the first returned record
    pub offset: u32,
    /// Fields the service actually filled in
    pub fields: ResultFields,
    /// Request flags word as the service applied it
    pub flags: u32,
}

/// Kind of item a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    File,
    Folder,
    Drive,
}

/// A single file result returned from search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRecord {
    pub kind: ItemKind,
    /// Filename (not full path)
    pub name: Option<String>,
    /// Parent directory
    pub path: Option<String>,
    /// Full path as formatted by the service
    pub full_path_and_name: Option<String>,
    pub extension: Option<String>,
    /// File size in bytes
    pub size: Option<u64>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    /// Raw file attribute bits
    pub attributes: Option<u32>,
    pub run_count: Option<u32>,
    pub date_run: Option<DateTime<Utc>>,
    pub recently_changed: Option<DateTime<Utc>>,
    /// Highlighted byte ranges into `name`
    pub highlights: Vec<Range<usize>>,
    /// Highlighted byte ranges into `path`
    pub path_highlights: Vec<Range<usize>>,
    /// Highlighted byte ranges into `full_path_and_name`
    pub full_path_highlights: Vec<Range<usize>>,
}

impl ResultRecord {
    /// Record of `kind` with every field unknown.
    pub fn empty(kind: ItemKind) -> Self {
        Self {
            kind,
            name: None,
            path: None,
            full_path_and_name: None,
            extension: None,
            size: None,
            created: None,
            modified: None,
            accessed: None,
            attributes: None,
            run_count: None,
            date_run: None,
            recently_changed: None,
            highlights: Vec::new(),
            path_highlights: Vec::new(),
            full_path_highlights: Vec::new(),
        }
    }

    /// The service's full path if it sent one, otherwise directory and
    /// filename joined, or whichever of the two is known.
    pub fn full_path(&self) -> Option<String> {
        if let Some(full) = &self.full_path_and_name {
            return Some(full.clone());
        }
        match (&self.path, &self.name) {
            (Some(dir), Some(name)) if dir.is_empty() => Some(name.clone()),
            (Some(dir), Some(name)) if dir.ends_with('\\') || dir.ends_with('/') => {
                Some(format!("{}{}", dir, name))
            }
            (Some(dir), Some(name)) => Some(format!("{}\\{}", dir, name)),
            (None, Some(name)) => Some(name.clone()),
            (Some(dir), None) => Some(dir.clone()),
            (None, None) => None,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, ItemKind::Folder | ItemKind::Drive)
    }
}

/// Search response decoded from a service reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResponse {
    /// Total count of matches (may be more than records.len() if paginated)
    pub total_matches: u32,
    /// Records in the order the service sorted them
    pub records: Vec<ResultRecord>,
    pub echoed: EchoedParams,
}

impl SearchResponse {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether further pages exist beyond this one.
    pub fn has_more(&self) -> bool {
        u64::from(self.echoed.offset) + (self.records.len() as u64) < u64::from(self.total_matches)
    }
}

/// Version reported by the indexing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ServiceVersion {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
    pub build: u32,
    /// Target machine code (1 = x86, 2 = x64, 3 = ARM, 4 = ARM64)
    pub target_machine: u32,
}

impl fmt::Display for ServiceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.revision, self.build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let request = SearchRequest::new("report").unwrap();
        assert_eq!(request.text(), "report");
        assert_eq!(request.max_count(), DEFAULT_MAX_RESULTS);
        assert_eq!(request.offset(), 0);
        assert_eq!(request.fields(), ResultFields::FULL_PATH);
        assert_eq!(request.timeout(), DEFAULT_TIMEOUT);
        assert_ne!(request.correlation_token(), 0);
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = SearchRequest::new("a").unwrap();
        let b = SearchRequest::new("a").unwrap();
        assert_ne!(a.correlation_token(), b.correlation_token());
    }

    #[test]
    fn test_rejects_zero_max_count() {
        let err = SearchRequest::builder("x").max_count(0).build().unwrap_err();
        assert!(matches!(err, QixError::InvalidArgument(_)));
    }

    #[test]
    fn test_rejects_window_overflow() {
        let err = SearchRequest::builder("x")
            .offset(u32::MAX)
            .max_count(2)
            .build()
            .unwrap_err();
        assert!(matches!(err, QixError::InvalidArgument(_)));
    }

    #[test]
    fn test_rejects_nul_and_empty_fields() {
        assert!(SearchRequest::builder("a\0b").build().is_err());
        assert!(SearchRequest::builder("ab")
            .fields(ResultFields::empty())
            .build()
            .is_err());
        assert!(SearchRequest::builder("ab")
            .timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(SearchRequest::builder("ab").correlation_token(0).build().is_err());
    }

    #[test]
    fn test_rejects_oversized_query() {
        let text = "x".repeat(MAX_QUERY_CHARS + 1);
        assert!(SearchRequest::new(text).is_err());
    }

    #[test]
    fn test_wire_flags_layout() {
        let request = SearchRequest::builder("x")
            .match_case(true)
            .regex(true)
            .sort(SortField::Size, SortDirection::Descending)
            .build()
            .unwrap();
        let flags = request.wire_flags();
        assert_eq!(flags & 0x1, 0x1);
        assert_eq!(flags & 0x8, 0x8);
        assert_ne!(flags & wire_flags::SORT_DESCENDING, 0);
        assert_eq!((flags & wire_flags::SORT_FIELD_MASK) >> wire_flags::SORT_FIELD_SHIFT, 3);
        assert_ne!(flags & wire_flags::WIDE_TEXT, 0);
    }

    #[test]
    fn test_field_names() {
        let fields = ResultFields::from_names(["full_path", "size", "modified"]).unwrap();
        assert!(fields.contains(ResultFields::NAME | ResultFields::PATH));
        assert!(fields.contains(ResultFields::SIZE));
        assert!(fields.contains(ResultFields::DATE_MODIFIED));
        assert!(!fields.contains(ResultFields::ATTRIBUTES));
        assert!(ResultFields::from_names(["bogus"]).is_err());
    }

    #[test]
    fn test_sort_field_codes() {
        for field in SortField::ALL {
            assert_eq!(SortField::from_code(field.code()), Some(field));
        }
        assert_eq!(SortField::from_code(0), None);
        assert_eq!(SortField::from_code(13), None);
    }

    #[test]
    fn test_sort_field_names_accept_both_separators() {
        assert_eq!("modified".parse::<SortField>(), Ok(SortField::DateModified));
        assert_eq!("date-modified".parse::<SortField>(), Ok(SortField::DateModified));
        assert_eq!("date_modified".parse::<SortField>(), Ok(SortField::DateModified));
        assert_eq!("run-count".parse::<SortField>(), Ok(SortField::RunCount));
        assert!("colour".parse::<SortField>().is_err());
    }

    #[test]
    fn test_sort_field_parses_its_own_serde_name() {
        for field in SortField::ALL {
            let json = serde_json::to_string(&field).unwrap();
            let name = json.trim_matches('"');
            assert_eq!(name.parse::<SortField>(), Ok(field), "{}", name);
        }
    }

    #[test]
    fn test_extended_field_names() {
        let fields = ResultFields::from_names([
            "extension",
            "date-accessed",
            "run_count",
            "date_run",
            "highlighted_path",
            "highlighted-full-path",
        ])
        .unwrap();
        assert_eq!(
            fields,
            ResultFields::EXTENSION
                | ResultFields::DATE_ACCESSED
                | ResultFields::RUN_COUNT
                | ResultFields::DATE_RUN
                | ResultFields::HIGHLIGHTED_PATH
                | ResultFields::HIGHLIGHTED_FULL_PATH_AND_NAME
        );
    }

    #[test]
    fn test_flag_bits_truncate_unknown() {
        assert_eq!(ResultFields::from_bits_truncate(0x0000_0200), ResultFields::empty());
        assert_eq!(SearchFlags::from_bits_truncate(0x81), SearchFlags::MATCH_CASE);
        assert_eq!(ResultFields::FULL_PATH.bits(), 0x3);
    }

    #[test]
    fn test_full_path() {
        let mut record = ResultRecord {
            name: Some("a.txt".to_string()),
            path: Some("C:\\docs".to_string()),
            ..ResultRecord::empty(ItemKind::File)
        };
        assert_eq!(record.full_path().as_deref(), Some("C:\\docs\\a.txt"));

        record.path = Some("C:\\".to_string());
        assert_eq!(record.full_path().as_deref(), Some("C:\\a.txt"));

        record.path = None;
        assert_eq!(record.full_path().as_deref(), Some("a.txt"));

        record.full_path_and_name = Some("\\\\server\\share\\a.txt".to_string());
        assert_eq!(record.full_path().as_deref(), Some("\\\\server\\share\\a.txt"));
    }

    #[test]
    fn test_version_display() {
        let version = ServiceVersion {
            major: 1,
            minor: 5,
            revision: 0,
            build: 1384,
            target_machine: 2,
        };
        assert_eq!(version.to_string(), "1.5.0.1384");
    }
}
