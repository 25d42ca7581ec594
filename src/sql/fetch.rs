// Copyright 2025 OpenObserve Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Textual manipulation of FetchXML envelopes. The generator owns query
//! construction; the engine only touches the top-level `<fetch>` attributes
//! (paging, counts, locking) and injects partition date filters, so these
//! helpers work on the raw text instead of a DOM.

use chrono::{DateTime, Utc};
use config::utils::time::format_fetch_datetime;
use once_cell::sync::Lazy;
use regex::Regex;

static ENTITY_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<entity\b[^>]*>").unwrap());
static ATTRIBUTE_ELEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"<attribute\b[^>]*/>").unwrap());
static NAME_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"name="([^"]*)""#).unwrap());
static ALIAS_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"alias="([^"]*)""#).unwrap());

pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Byte range of the top-level `<fetch ...>` open tag.
fn envelope_range(xml: &str) -> Option<(usize, usize)> {
    let start = xml.find("<fetch")?;
    let end = xml[start..].find('>')? + start;
    Some((start, end))
}

/// Value of an attribute on the `<fetch>` envelope.
pub fn get_envelope_attr(xml: &str, name: &str) -> Option<String> {
    let (start, end) = envelope_range(xml)?;
    let tag = &xml[start..end];
    let probe = format!(" {name}=\"");
    let at = tag.find(&probe)?;
    let rest = &tag[at + probe.len()..];
    let quote = rest.find('"')?;
    Some(rest[..quote].to_string())
}

/// Set (or replace) an attribute on the `<fetch>` envelope. A `None` value
/// removes the attribute.
pub fn set_envelope_attr(xml: &str, name: &str, value: Option<&str>) -> String {
    let Some((start, end)) = envelope_range(xml) else {
        return xml.to_string();
    };
    let tag = &xml[start..end];
    let probe = format!(" {name}=\"");
    let new_tag = match tag.find(&probe) {
        Some(at) => {
            let value_start = at + probe.len();
            let value_end = value_start + tag[value_start..].find('"').unwrap_or(0);
            match value {
                Some(v) => format!("{}{}{}", &tag[..value_start], xml_escape(v), &tag[value_end..]),
                None => {
                    // drop ` name="value"` entirely
                    format!("{}{}", &tag[..at], &tag[value_end + 1..])
                }
            }
        }
        None => match value {
            Some(v) => {
                let insert_at = if tag.ends_with('/') { tag.len() - 1 } else { tag.len() };
                format!(
                    "{} {name}=\"{}\"{}",
                    &tag[..insert_at],
                    xml_escape(v),
                    &tag[insert_at..]
                )
            }
            None => tag.to_string(),
        },
    };
    format!("{}{}{}", &xml[..start], new_tag, &xml[end..])
}

/// Substitute page number, page size and paging cookie into the envelope.
pub fn prepare_page(xml: &str, page: u32, count: u32, cookie: Option<&str>) -> String {
    let xml = set_envelope_attr(xml, "page", Some(&page.to_string()));
    let xml = set_envelope_attr(&xml, "count", Some(&count.to_string()));
    match cookie {
        Some(cookie) => set_envelope_attr(&xml, "paging-cookie", Some(cookie)),
        None => set_envelope_attr(&xml, "paging-cookie", None),
    }
}

/// Request the total record count on this page.
pub fn set_return_total_count(xml: &str) -> String {
    set_envelope_attr(xml, "returntotalrecordcount", Some("true"))
}

pub fn set_no_lock(xml: &str) -> String {
    set_envelope_attr(xml, "no-lock", Some("true"))
}

/// Remove a declared `top` limit, returning it so the scan can re-express it
/// as a first-page size (top and paging are mutually exclusive back-end
/// features).
pub fn take_top(xml: &str) -> (String, Option<u32>) {
    match get_envelope_attr(xml, "top").and_then(|v| v.parse::<u32>().ok()) {
        Some(top) => (set_envelope_attr(xml, "top", None), Some(top)),
        None => (xml.to_string(), None),
    }
}

pub fn is_aggregate(xml: &str) -> bool {
    get_envelope_attr(xml, "aggregate").as_deref() == Some("true")
}

/// Server-side joins show up as nested link-entity elements.
pub fn has_link_entity(xml: &str) -> bool {
    xml.contains("<link-entity")
}

/// Inject a half-open `[start, end)` filter on the given date attribute
/// right inside the first `<entity>` element.
pub fn inject_date_range_filter(
    xml: &str,
    attribute: &str,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
) -> String {
    let Some(m) = ENTITY_OPEN.find(xml) else {
        return xml.to_string();
    };
    let filter = format!(
        "<filter type=\"and\"><condition attribute=\"{attribute}\" operator=\"ge\" \
         value=\"{}\" /><condition attribute=\"{attribute}\" operator=\"lt\" value=\"{}\" \
         /></filter>",
        format_fetch_datetime(start),
        format_fetch_datetime(end),
    );
    format!("{}{}{}", &xml[..m.end()], filter, &xml[m.end()..])
}

/// For every `aggregate="avg"` attribute, add a `countcolumn` companion on
/// the same source column under a derived alias. Returns the rewritten
/// query and the `avg alias → count alias` pairs for the merge step.
pub fn inject_avg_companions(xml: &str) -> (String, Vec<(String, String)>) {
    let mut out = String::with_capacity(xml.len());
    let mut pairs = Vec::new();
    let mut last = 0;
    for m in ATTRIBUTE_ELEM.find_iter(xml) {
        out.push_str(&xml[last..m.end()]);
        last = m.end();
        let elem = m.as_str();
        if !elem.contains("aggregate=\"avg\"") {
            continue;
        }
        let (Some(name), Some(alias)) = (
            NAME_ATTR.captures(elem).map(|c| c[1].to_string()),
            ALIAS_ATTR.captures(elem).map(|c| c[1].to_string()),
        ) else {
            continue;
        };
        let count_alias = format!("{alias}_count");
        out.push_str(&format!(
            "<attribute name=\"{name}\" alias=\"{count_alias}\" aggregate=\"countcolumn\" />"
        ));
        pairs.push((alias, count_alias));
    }
    out.push_str(&xml[last..]);
    (out, pairs)
}
