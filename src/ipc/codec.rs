//! Binary wire codec for search requests and replies.
//!
//! Request: 30-byte little-endian header followed by the query text.
//! ```text
//! version u16 | flags u32 | max_count u32 | offset u32 | payload_len u32 | token u64 | fields u32
//! ```
//! Reply: 30-byte header, `returned` fixed 116-byte record descriptors, then a
//! string table the descriptors point into.
//! ```text
//! version u16 | token u64 | total u32 | returned u32 | fields u32 | offset u32 | flags u32
//! item_flags u32 | name off/len | path off/len | size u64 | created u64 | modified u64
//!     | attributes u32 | highlighted name off/len | extension off/len
//!     | full path off/len | accessed u64 | run_count u32 | date_run u64
//!     | recently_changed u64 | highlighted path off/len | highlighted full path off/len
//! ```
//! The encoder side of replies and the decoder side of requests exist for
//! service implementations and the in-process mock.

use std::ops::Range;

use chrono::{DateTime, Utc};

use crate::ipc::protocol::{
    item_flags, wire_flags, EchoedParams, ItemKind, ResultFields, ResultRecord, SearchFlags,
    SearchRequest, SearchResponse, SortDirection, SortField, TextEncoding, MAX_REPLY_SIZE,
    PROTOCOL_VERSION, RECORD_DESCRIPTOR_LEN, REPLY_HEADER_LEN, REQUEST_HEADER_LEN,
};
use crate::{QixError, Result};

/// FILETIME value of 1970-01-01T00:00:00Z.
const FILETIME_UNIX_EPOCH: i128 = 116_444_736_000_000_000;
const FILETIME_TICKS_PER_SEC: i128 = 10_000_000;

/// Size or timestamp the service could not determine.
pub const UNKNOWN: u64 = u64::MAX;

// Descriptor field offsets
const D_ITEM_FLAGS: usize = 0;
const D_NAME: usize = 4;
const D_PATH: usize = 12;
const D_SIZE: usize = 20;
const D_CREATED: usize = 28;
const D_MODIFIED: usize = 36;
const D_ATTRIBUTES: usize = 44;
const D_HIGHLIGHT: usize = 48;
const D_EXTENSION: usize = 56;
const D_FULL_PATH: usize = 64;
const D_ACCESSED: usize = 72;
const D_RUN_COUNT: usize = 80;
const D_DATE_RUN: usize = 84;
const D_RECENTLY_CHANGED: usize = 92;
const D_HIGHLIGHT_PATH: usize = 100;
const D_HIGHLIGHT_FULL_PATH: usize = 108;

/// Encode a search request into its wire form.
///
/// Encoding is deterministic: the same request always yields the same bytes.
pub fn encode_request(request: &SearchRequest) -> Vec<u8> {
    let text = encode_text(request.text(), request.encoding());

    let mut buf = Vec::with_capacity(REQUEST_HEADER_LEN + text.len());
    buf.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    buf.extend_from_slice(&request.wire_flags().to_le_bytes());
    buf.extend_from_slice(&request.max_count().to_le_bytes());
    buf.extend_from_slice(&request.offset().to_le_bytes());
    buf.extend_from_slice(&(text.len() as u32).to_le_bytes());
    buf.extend_from_slice(&request.correlation_token().to_le_bytes());
    buf.extend_from_slice(&request.fields().bits().to_le_bytes());
    buf.extend_from_slice(&text);
    buf
}

/// Read the correlation token out of an encoded request.
pub fn peek_request_token(bytes: &[u8]) -> Option<u64> {
    read_u64(bytes, 18)
}

/// Read the correlation token out of an encoded reply without validating it.
pub fn peek_reply_token(bytes: &[u8]) -> Option<u64> {
    read_u64(bytes, 2)
}

/// Decode a service reply and check it belongs to `request`.
///
/// The protocol version and correlation token are validated before any count,
/// offset or length in the payload is used.
///
/// # Errors
/// `ProtocolMismatch` for a foreign version or token, `CorruptReply` for any
/// structural problem. Nothing is returned from a partially valid buffer.
pub fn decode_reply(bytes: &[u8], request: &SearchRequest) -> Result<SearchResponse> {
    if bytes.len() > MAX_REPLY_SIZE {
        return Err(corrupt(format!(
            "Reply too large: {} bytes (max {})",
            bytes.len(),
            MAX_REPLY_SIZE
        )));
    }
    if bytes.len() < REPLY_HEADER_LEN {
        return Err(corrupt(format!(
            "Reply of {} bytes is shorter than the {}-byte header",
            bytes.len(),
            REPLY_HEADER_LEN
        )));
    }

    let header = |offset: usize| read_u32(bytes, offset).ok_or_else(|| corrupt("Truncated header"));

    let version = read_u16(bytes, 0).ok_or_else(|| corrupt("Truncated header"))?;
    if version != PROTOCOL_VERSION {
        return Err(QixError::ProtocolMismatch(format!(
            "Service speaks protocol version {}, expected {}",
            version, PROTOCOL_VERSION
        )));
    }

    let token = read_u64(bytes, 2).ok_or_else(|| corrupt("Truncated header"))?;
    if token != request.correlation_token() {
        return Err(QixError::ProtocolMismatch(format!(
            "Reply token {:#018x} does not match request token {:#018x}",
            token,
            request.correlation_token()
        )));
    }

    let total_matches = header(10)?;
    let returned = header(14)?;
    let echoed_fields = ResultFields::from_bits_truncate(header(18)?);
    let echoed_offset = header(22)?;
    let echoed_flags = header(26)?;

    if returned > request.max_count() {
        return Err(corrupt(format!(
            "Reply carries {} records but only {} were requested",
            returned,
            request.max_count()
        )));
    }
    if returned > total_matches {
        return Err(corrupt(format!(
            "Reply carries {} records but reports {} total matches",
            returned, total_matches
        )));
    }
    if echoed_offset != request.offset() {
        return Err(corrupt(format!(
            "Reply starts at offset {}, request asked for {}",
            echoed_offset,
            request.offset()
        )));
    }
    let reply_wide = echoed_flags & wire_flags::WIDE_TEXT != 0;
    if reply_wide != (request.encoding() == TextEncoding::Wide) {
        return Err(corrupt("Reply text width differs from the request"));
    }

    let table_start = (returned as usize)
        .checked_mul(RECORD_DESCRIPTOR_LEN)
        .and_then(|n| n.checked_add(REPLY_HEADER_LEN))
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| {
            corrupt(format!(
                "{} record descriptors do not fit in a {}-byte reply",
                returned,
                bytes.len()
            ))
        })?;

    let strings = StringTable {
        data: &bytes[table_start..],
        encoding: request.encoding(),
    };
    let wanted = request.fields().intersection(echoed_fields);

    let mut records = Vec::with_capacity(returned as usize);
    for index in 0..returned as usize {
        let start = REPLY_HEADER_LEN + index * RECORD_DESCRIPTOR_LEN;
        let descriptor = &bytes[start..start + RECORD_DESCRIPTOR_LEN];
        records.push(decode_record(descriptor, &strings, wanted, index)?);
    }

    Ok(SearchResponse {
        total_matches,
        records,
        echoed: EchoedParams {
            protocol_version: version,
            correlation_token: token,
            offset: echoed_offset,
            fields: echoed_fields,
            flags: echoed_flags,
        },
    })
}

/// Decode one descriptor, touching only the fields in `wanted`.
fn decode_record(
    descriptor: &[u8],
    strings: &StringTable<'_>,
    wanted: ResultFields,
    index: usize,
) -> Result<ResultRecord> {
    let field = |offset: usize| read_u32(descriptor, offset).unwrap_or_default();
    let wide = |offset: usize| read_u64(descriptor, offset).unwrap_or(UNKNOWN);
    let text = |flag: ResultFields, offset: usize, what: &str| -> Result<Option<String>> {
        if !wanted.contains(flag) {
            return Ok(None);
        }
        strings
            .get(field(offset), field(offset + 4))
            .map(Some)
            .map_err(|e| corrupt(format!("Record {} {}: {}", index, what, e)))
    };
    let time = |flag: ResultFields, offset: usize| -> Option<DateTime<Utc>> {
        if wanted.contains(flag) {
            filetime_to_datetime(wide(offset))
        } else {
            None
        }
    };

    let flags = field(D_ITEM_FLAGS);
    let kind = if flags & item_flags::DRIVE != 0 {
        ItemKind::Drive
    } else if flags & item_flags::FOLDER != 0 {
        ItemKind::Folder
    } else {
        ItemKind::File
    };

    let mut name = text(ResultFields::NAME, D_NAME, "name")?;
    let mut path = text(ResultFields::PATH, D_PATH, "path")?;
    let mut full_path_and_name = text(ResultFields::FULL_PATH_AND_NAME, D_FULL_PATH, "full path")?;

    let highlights = match text(ResultFields::HIGHLIGHTED_NAME, D_HIGHLIGHT, "highlighted name")? {
        Some(markup) => merge_highlighted(&mut name, &markup, "name", index)?,
        None => Vec::new(),
    };
    let path_highlights =
        match text(ResultFields::HIGHLIGHTED_PATH, D_HIGHLIGHT_PATH, "highlighted path")? {
            Some(markup) => merge_highlighted(&mut path, &markup, "path", index)?,
            None => Vec::new(),
        };
    let full_path_highlights = match text(
        ResultFields::HIGHLIGHTED_FULL_PATH_AND_NAME,
        D_HIGHLIGHT_FULL_PATH,
        "highlighted full path",
    )? {
        Some(markup) => merge_highlighted(&mut full_path_and_name, &markup, "full path", index)?,
        None => Vec::new(),
    };

    Ok(ResultRecord {
        kind,
        name,
        path,
        full_path_and_name,
        extension: text(ResultFields::EXTENSION, D_EXTENSION, "extension")?,
        size: wanted
            .contains(ResultFields::SIZE)
            .then(|| wide(D_SIZE))
            .filter(|&s| s != UNKNOWN),
        created: time(ResultFields::DATE_CREATED, D_CREATED),
        modified: time(ResultFields::DATE_MODIFIED, D_MODIFIED),
        accessed: time(ResultFields::DATE_ACCESSED, D_ACCESSED),
        attributes: wanted
            .contains(ResultFields::ATTRIBUTES)
            .then(|| field(D_ATTRIBUTES)),
        run_count: wanted
            .contains(ResultFields::RUN_COUNT)
            .then(|| field(D_RUN_COUNT)),
        date_run: time(ResultFields::DATE_RUN, D_DATE_RUN),
        recently_changed: time(ResultFields::DATE_RECENTLY_CHANGED, D_RECENTLY_CHANGED),
        highlights,
        path_highlights,
        full_path_highlights,
    })
}

/// Strip the markup of a highlighted string. The plain text must equal
/// `target` when that was sent too, otherwise it fills `target` in.
fn merge_highlighted(
    target: &mut Option<String>,
    markup: &str,
    what: &str,
    index: usize,
) -> Result<Vec<Range<usize>>> {
    let (plain, ranges) = parse_highlights(markup);
    match target {
        Some(existing) if *existing != plain => Err(corrupt(format!(
            "Record {} highlighted {} '{}' does not match '{}'",
            index, what, markup, existing
        ))),
        Some(_) => Ok(ranges),
        None => {
            *target = Some(plain);
            Ok(ranges)
        }
    }
}

/// View over the trailing string table of a reply.
struct StringTable<'a> {
    data: &'a [u8],
    encoding: TextEncoding,
}

impl StringTable<'_> {
    fn get(&self, offset: u32, len: u32) -> std::result::Result<String, String> {
        let start = offset as usize;
        let end = start
            .checked_add(len as usize)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                format!(
                    "string at {}+{} runs past the {}-byte string table",
                    offset,
                    len,
                    self.data.len()
                )
            })?;
        decode_text(&self.data[start..end], self.encoding)
    }
}

fn encode_text(text: &str, encoding: TextEncoding) -> Vec<u8> {
    match encoding {
        TextEncoding::Narrow => text.as_bytes().to_vec(),
        TextEncoding::Wide => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
    }
}

fn decode_text(bytes: &[u8], encoding: TextEncoding) -> std::result::Result<String, String> {
    match encoding {
        TextEncoding::Narrow => std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| format!("invalid UTF-8: {}", e)),
        TextEncoding::Wide => {
            if bytes.len() % 2 != 0 {
                return Err(format!("odd byte length {} for UTF-16 text", bytes.len()));
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units).map_err(|e| format!("invalid UTF-16: {}", e))
        }
    }
}

/// Strip `*` highlight markup, returning the plain text and the highlighted
/// byte ranges within it. `**` is a literal asterisk; an unterminated
/// highlight runs to the end.
pub fn parse_highlights(markup: &str) -> (String, Vec<Range<usize>>) {
    let mut plain = String::with_capacity(markup.len());
    let mut ranges = Vec::new();
    let mut open: Option<usize> = None;

    let mut chars = markup.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '*' {
            plain.push(c);
            continue;
        }
        if chars.peek() == Some(&'*') {
            chars.next();
            plain.push('*');
            continue;
        }
        match open.take() {
            Some(start) => {
                if start < plain.len() {
                    ranges.push(start..plain.len());
                }
            }
            None => open = Some(plain.len()),
        }
    }
    if let Some(start) = open {
        if start < plain.len() {
            ranges.push(start..plain.len());
        }
    }

    (plain, ranges)
}

/// Inverse of [`parse_highlights`]: wrap `ranges` of `text` in `*` markers.
///
/// Overlapping or touching ranges are merged first, since the markup cannot
/// express two adjacent spans. A span ending right before a literal `*` reads
/// back with that asterisk outside the span only when it is not highlighted.
pub fn highlight_markup(text: &str, ranges: &[Range<usize>]) -> String {
    let mut spans: Vec<Range<usize>> = ranges
        .iter()
        .map(|r| r.start..r.end.min(text.len()))
        .filter(|r| r.start < r.end)
        .collect();
    spans.sort_by_key(|r| r.start);

    let mut merged: Vec<Range<usize>> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }

    let mut out = String::with_capacity(text.len() + merged.len() * 2);
    for (pos, c) in text.char_indices() {
        if merged.iter().any(|r| r.start == pos) {
            out.push('*');
        }
        if c == '*' {
            out.push_str("**");
        } else {
            out.push(c);
        }
        let next = pos + c.len_utf8();
        if merged.iter().any(|r| r.end == next) {
            out.push('*');
        }
    }
    out
}

/// Convert a FILETIME (100ns ticks since 1601-01-01 UTC) to a UTC timestamp.
/// Zero and `u64::MAX` mean "unknown".
pub fn filetime_to_datetime(ticks: u64) -> Option<DateTime<Utc>> {
    if ticks == 0 || ticks == UNKNOWN {
        return None;
    }
    let since_unix = i128::from(ticks) - FILETIME_UNIX_EPOCH;
    let secs = since_unix.div_euclid(FILETIME_TICKS_PER_SEC);
    let nanos = since_unix.rem_euclid(FILETIME_TICKS_PER_SEC) * 100;
    DateTime::from_timestamp(i64::try_from(secs).ok()?, nanos as u32)
}

/// Convert a UTC timestamp to FILETIME ticks. Times before 1601 map to 0.
pub fn datetime_to_filetime(time: DateTime<Utc>) -> u64 {
    let ticks = i128::from(time.timestamp()) * FILETIME_TICKS_PER_SEC
        + i128::from(time.timestamp_subsec_nanos() / 100)
        + FILETIME_UNIX_EPOCH;
    u64::try_from(ticks).unwrap_or(0)
}

fn corrupt(msg: impl Into<String>) -> QixError {
    QixError::CorruptReply(msg.into())
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(raw))
}

fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let raw: [u8; 8] = bytes.get(offset..offset + 8)?.try_into().ok()?;
    Some(u64::from_le_bytes(raw))
}

/// A request as seen by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub version: u16,
    pub flags: u32,
    pub max_count: u32,
    pub offset: u32,
    pub token: u64,
    pub fields: ResultFields,
    pub text: String,
}

impl RequestFrame {
    pub fn search_flags(&self) -> SearchFlags {
        SearchFlags::from_bits_truncate(self.flags)
    }

    pub fn sort_field(&self) -> Option<SortField> {
        let code = (self.flags & wire_flags::SORT_FIELD_MASK) >> wire_flags::SORT_FIELD_SHIFT;
        SortField::from_code(code as u8)
    }

    pub fn sort_direction(&self) -> SortDirection {
        if self.flags & wire_flags::SORT_DESCENDING != 0 {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        }
    }

    pub fn encoding(&self) -> TextEncoding {
        if self.flags & wire_flags::WIDE_TEXT != 0 {
            TextEncoding::Wide
        } else {
            TextEncoding::Narrow
        }
    }
}

/// Parse an encoded request (service side).
///
/// # Errors
/// `CorruptReply` if the buffer is truncated or the text is not valid in the
/// declared width. The version is returned as-is for the caller to judge.
pub fn decode_request(bytes: &[u8]) -> Result<RequestFrame> {
    if bytes.len() < REQUEST_HEADER_LEN {
        return Err(corrupt(format!("Request of {} bytes is truncated", bytes.len())));
    }
    let truncated = || corrupt("Truncated request header");
    let version = read_u16(bytes, 0).ok_or_else(truncated)?;
    let flags = read_u32(bytes, 2).ok_or_else(truncated)?;
    let max_count = read_u32(bytes, 6).ok_or_else(truncated)?;
    let offset = read_u32(bytes, 10).ok_or_else(truncated)?;
    let payload_len = read_u32(bytes, 14).ok_or_else(truncated)? as usize;
    let token = read_u64(bytes, 18).ok_or_else(truncated)?;
    let fields = ResultFields::from_bits_truncate(read_u32(bytes, 26).ok_or_else(truncated)?);

    let payload = bytes
        .get(REQUEST_HEADER_LEN..)
        .filter(|rest| rest.len() == payload_len)
        .ok_or_else(|| {
            corrupt(format!(
                "Request declares {} payload bytes, carries {}",
                payload_len,
                bytes.len() - REQUEST_HEADER_LEN
            ))
        })?;

    let mut frame = RequestFrame {
        version,
        flags,
        max_count,
        offset,
        token,
        fields,
        text: String::new(),
    };
    frame.text = decode_text(payload, frame.encoding()).map_err(corrupt)?;
    Ok(frame)
}

/// One record as the service writes it. Fields the request did not ask for
/// are written as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyItem {
    pub item_flags: u32,
    pub name: String,
    pub path: String,
    pub full_path_and_name: String,
    pub extension: String,
    pub size: u64,
    /// FILETIME ticks
    pub created: u64,
    /// FILETIME ticks
    pub modified: u64,
    /// FILETIME ticks
    pub accessed: u64,
    pub attributes: u32,
    pub run_count: u32,
    /// FILETIME ticks
    pub date_run: u64,
    /// FILETIME ticks
    pub recently_changed: u64,
    /// Name with `*` highlight markup
    pub highlighted_name: String,
    pub highlighted_path: String,
    pub highlighted_full_path_and_name: String,
}

impl ReplyItem {
    /// A plain file entry with name and directory; derived text fields are
    /// filled in, sizes and times are unknown.
    pub fn file(path: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let path = path.into();
        let full_path_and_name = if path.is_empty() {
            name.clone()
        } else if path.ends_with('\\') {
            format!("{}{}", path, name)
        } else {
            format!("{}\\{}", path, name)
        };
        Self {
            extension: name
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_string())
                .unwrap_or_default(),
            highlighted_name: name.replace('*', "**"),
            highlighted_path: path.replace('*', "**"),
            highlighted_full_path_and_name: full_path_and_name.replace('*', "**"),
            name,
            path,
            full_path_and_name,
            size: UNKNOWN,
            created: UNKNOWN,
            modified: UNKNOWN,
            accessed: UNKNOWN,
            date_run: UNKNOWN,
            recently_changed: UNKNOWN,
            ..Default::default()
        }
    }
}

/// A full reply as the service writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFrame {
    pub version: u16,
    pub token: u64,
    pub total_matches: u32,
    pub offset: u32,
    pub fields: ResultFields,
    pub flags: u32,
    pub items: Vec<ReplyItem>,
}

impl ReplyFrame {
    /// Reply echoing `request`, filling every requested field.
    pub fn for_request(request: &RequestFrame, total_matches: u32, items: Vec<ReplyItem>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            token: request.token,
            total_matches,
            offset: request.offset,
            fields: request.fields,
            flags: request.flags,
            items,
        }
    }

    fn encoding(&self) -> TextEncoding {
        if self.flags & wire_flags::WIDE_TEXT != 0 {
            TextEncoding::Wide
        } else {
            TextEncoding::Narrow
        }
    }
}

/// Encode a reply (service side).
pub fn encode_reply(reply: &ReplyFrame) -> Vec<u8> {
    let encoding = reply.encoding();
    let mut table: Vec<u8> = Vec::new();
    let mut push_string = |text: &str, requested: bool| -> (u32, u32) {
        if !requested {
            return (0, 0);
        }
        let encoded = encode_text(text, encoding);
        let offset = table.len() as u32;
        table.extend_from_slice(&encoded);
        (offset, encoded.len() as u32)
    };

    let mut descriptors = Vec::with_capacity(reply.items.len() * RECORD_DESCRIPTOR_LEN);
    for item in &reply.items {
        let has = |field: ResultFields| reply.fields.contains(field);
        let mut string = |field: ResultFields, text: &str| push_string(text, has(field));
        let name = string(ResultFields::NAME, &item.name);
        let path = string(ResultFields::PATH, &item.path);
        let highlight = string(ResultFields::HIGHLIGHTED_NAME, &item.highlighted_name);
        let extension = string(ResultFields::EXTENSION, &item.extension);
        let full_path = string(ResultFields::FULL_PATH_AND_NAME, &item.full_path_and_name);
        let highlight_path = string(ResultFields::HIGHLIGHTED_PATH, &item.highlighted_path);
        let highlight_full_path = string(
            ResultFields::HIGHLIGHTED_FULL_PATH_AND_NAME,
            &item.highlighted_full_path_and_name,
        );
        let wide = |field: ResultFields, value: u64| if has(field) { value } else { 0 };
        let narrow = |field: ResultFields, value: u32| if has(field) { value } else { 0 };

        let d = &mut descriptors;
        let put_u32 = |d: &mut Vec<u8>, v: u32| d.extend_from_slice(&v.to_le_bytes());
        let put_u64 = |d: &mut Vec<u8>, v: u64| d.extend_from_slice(&v.to_le_bytes());
        let put_str = |d: &mut Vec<u8>, (off, len): (u32, u32)| {
            d.extend_from_slice(&off.to_le_bytes());
            d.extend_from_slice(&len.to_le_bytes());
        };

        put_u32(d, item.item_flags);
        put_str(d, name);
        put_str(d, path);
        put_u64(d, wide(ResultFields::SIZE, item.size));
        put_u64(d, wide(ResultFields::DATE_CREATED, item.created));
        put_u64(d, wide(ResultFields::DATE_MODIFIED, item.modified));
        put_u32(d, narrow(ResultFields::ATTRIBUTES, item.attributes));
        put_str(d, highlight);
        put_str(d, extension);
        put_str(d, full_path);
        put_u64(d, wide(ResultFields::DATE_ACCESSED, item.accessed));
        put_u32(d, narrow(ResultFields::RUN_COUNT, item.run_count));
        put_u64(d, wide(ResultFields::DATE_RUN, item.date_run));
        put_u64(d, wide(ResultFields::DATE_RECENTLY_CHANGED, item.recently_changed));
        put_str(d, highlight_path);
        put_str(d, highlight_full_path);
    }

    let mut buf = Vec::with_capacity(REPLY_HEADER_LEN + descriptors.len() + table.len());
    buf.extend_from_slice(&reply.version.to_le_bytes());
    buf.extend_from_slice(&reply.token.to_le_bytes());
    buf.extend_from_slice(&reply.total_matches.to_le_bytes());
    buf.extend_from_slice(&(reply.items.len() as u32).to_le_bytes());
    buf.extend_from_slice(&reply.fields.bits().to_le_bytes());
    buf.extend_from_slice(&reply.offset.to_le_bytes());
    buf.extend_from_slice(&reply.flags.to_le_bytes());
    buf.extend_from_slice(&descriptors);
    buf.extend_from_slice(&table);
    buf
}
