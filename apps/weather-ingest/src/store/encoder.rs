use crate::telemetry::TelemetryEvent;
use bytes::{Bytes, BytesMut};
use std::borrow::Cow;
use std::fmt::Write as _;

/// Measurement name every reading is written under.
pub const MEASUREMENT: &str = "readings";

const NANOS_PER_SECOND: i64 = 1_000_000_000;
const TAG_RESERVED: [char; 5] = [' ', ',', '=', '"', '\''];

/// Replaces characters that would split a tag set with `_`.
pub fn sanitize_tag(tag: &str) -> Cow<'_, str> {
    if !tag.contains(TAG_RESERVED) {
        return Cow::Borrowed(tag);
    }
    let sanitized = tag.replace(TAG_RESERVED, "_");
    tracing::debug!(original = tag, sanitized = %sanitized, "sanitized tag");
    Cow::Owned(sanitized)
}

/// Appends one `readings,station=..,sensor=.. value=.. <ns>\n` line to `buf`.
///
/// Timestamps and values are not range checked; the seconds to nanoseconds conversion
/// wraps rather than panicking on absurd inputs.
pub fn encode_line(event: &TelemetryEvent, buf: &mut BytesMut) {
    // BytesMut grows on demand, so fmt::Write never reports an error here.
    let _ = writeln!(
        buf,
        "{MEASUREMENT},station={},sensor={} value={:.6} {}",
        sanitize_tag(&event.station),
        sanitize_tag(&event.sensor),
        event.value,
        event.timestamp.wrapping_mul(NANOS_PER_SECOND),
    );
}

pub fn encode_line_string(event: &TelemetryEvent) -> String {
    let mut buf = BytesMut::with_capacity(96);
    encode_line(event, &mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Concatenates the lines for `events`, in order, into a single write payload.
pub fn encode_batch(events: &[TelemetryEvent]) -> Bytes {
    let mut buf = BytesMut::with_capacity(events.len() * 96);
    for event in events {
        encode_line(event, &mut buf);
    }
    buf.freeze()
}
