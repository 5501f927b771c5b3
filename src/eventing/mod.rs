use std::fmt::Display;

use anyhow::Context;
use quick_xml::events::{BytesStart, BytesText, Event};
use reqwest::StatusCode;

use crate::{templates::UpnpAgent, IntoXml, XmlReaderExt, XmlWriter};

pub(crate) mod subscribers_store;

pub use subscribers_store::{Subscriber, SubscribersStore};

/// Default subscription lease, used whenever a SUBSCRIBE request omits
/// `TIMEOUT` or asks for an infinite one (which GENA forbids granting).
pub const DEFAULT_SUBSCRIPTION_TIMEOUT_SECS: u64 = 1800;

fn rfc1123_now() -> String {
    let now = time::OffsetDateTime::now_utc();
    let format = time::format_description::parse_borrowed::<2>(
        "[weekday repr:short], [day padding:zero] [month repr:short] [year] [hour]:[minute]:[second] GMT",
    )
    .expect("infallible");
    now.format(&format).expect("infallible")
}

#[derive(Debug)]
pub struct SubscribeResponse {
    pub user_agent: UpnpAgent<'static>,
    pub timeout: usize,
    pub sid: uuid::Uuid,
}

impl Display for SubscribeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "HTTP/1.1 200 OK\r\n\
DATE: {date}\r\n\
SERVER: {user_agent}\r\n\
SID: uuid:{sid}\r\n\
CONTENT-LENGTH: 0\r\n\
TIMEOUT: Second-{timeout}\r\n",
            date = rfc1123_now(),
            user_agent = self.user_agent,
            timeout = self.timeout,
            sid = self.sid,
        )?;
        write!(f, "\r\n")
    }
}

#[derive(Debug)]
pub struct SubscriptionError(pub StatusCode);

impl SubscriptionError {
    /// An SID header field and one of NT or CALLBACK header fields are present.
    pub const INCOMPATIBLE_HEADER_FIELD: Self = Self(StatusCode::BAD_REQUEST);
    /// CALLBACK header field is missing or does not contain a valid HTTP URL;
    /// or the NT header field does not equal upnp:event.
    pub const PRECONDITION_FAILED: Self = Self(StatusCode::PRECONDITION_FAILED);
    /// SID header refers to a subscription the publisher does not have.
    pub const UNKNOWN_SID: Self = Self(StatusCode::PRECONDITION_FAILED);
}

impl Display for SubscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SubscriptionError {}

#[derive(Debug)]
pub enum EventMessage {
    Subscribe {
        callback: String,
        nt: String,
        timeout: usize,
    },
    Renew {
        sid: uuid::Uuid,
        timeout: usize,
    },
    Unsubscribe {
        sid: uuid::Uuid,
    },
}

fn parse_timeout(value: &str) -> usize {
    value
        .strip_prefix("Second-")
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_SUBSCRIPTION_TIMEOUT_SECS as usize)
}

fn parse_callback(value: &str) -> anyhow::Result<String> {
    let value = value.trim();
    let start = value.find('<').context("callback missing '<'")?;
    let end = value.find('>').context("callback missing '>'")?;
    anyhow::ensure!(end > start, "malformed callback header");
    Ok(value[start + 1..end].to_string())
}

impl EventMessage {
    /// Parses an incoming `SUBSCRIBE`/`UNSUBSCRIBE` request, given its HTTP
    /// method and header name/value pairs as delivered by the HTTP server,
    /// into one of the three GENA operations a publisher can receive.
    pub fn parse<'h>(
        method: &str,
        headers: impl Iterator<Item = (&'h str, &'h str)>,
    ) -> anyhow::Result<Self> {
        let mut callback = None;
        let mut nt = None;
        let mut timeout = None;
        let mut sid = None;
        for (name, value) in headers {
            let value = value.trim();
            match name.to_ascii_lowercase().as_str() {
                "callback" => callback = Some(parse_callback(value)?),
                "nt" => nt = Some(value.to_string()),
                "timeout" => timeout = Some(parse_timeout(value)),
                "sid" => {
                    sid = Some(
                        value
                            .strip_prefix("uuid:")
                            .unwrap_or(value)
                            .parse()
                            .context("parse sid")?,
                    )
                }
                _ => {}
            }
        }

        match method {
            "SUBSCRIBE" => {
                if let Some(sid) = sid {
                    anyhow::ensure!(
                        callback.is_none() && nt.is_none(),
                        "SID is incompatible with CALLBACK/NT"
                    );
                    Ok(EventMessage::Renew {
                        sid,
                        timeout: timeout.unwrap_or(DEFAULT_SUBSCRIPTION_TIMEOUT_SECS as usize),
                    })
                } else {
                    let callback = callback.context("missing CALLBACK header")?;
                    let nt = nt.context("missing NT header")?;
                    anyhow::ensure!(nt == "upnp:event", "NT must be upnp:event");
                    Ok(EventMessage::Subscribe {
                        callback,
                        nt,
                        timeout: timeout.unwrap_or(DEFAULT_SUBSCRIPTION_TIMEOUT_SECS as usize),
                    })
                }
            }
            "UNSUBSCRIBE" => {
                let sid = sid.context("missing SID header")?;
                Ok(EventMessage::Unsubscribe { sid })
            }
            rest => Err(anyhow::anyhow!("unknown event method: {rest}")),
        }
    }
}

/// A single changed state variable carried in a `NOTIFY` body.
#[derive(Debug, Clone)]
pub struct PropertyChange {
    pub name: String,
    pub value: String,
}

/// Builds the `e:propertyset`/`e:property` body a device sends to a
/// subscriber whenever an evented state variable changes.
pub fn build_property_set(changes: &[PropertyChange]) -> anyhow::Result<String> {
    let mut w = quick_xml::Writer::new(Vec::new());
    let root = BytesStart::new("e:propertyset")
        .with_attributes([("xmlns:e", "urn:schemas-upnp-org:event-1-0")]);
    let root_end = root.to_end().into_owned();
    w.write_event(Event::Start(root))?;
    for change in changes {
        let property = BytesStart::new("e:property");
        let property_end = property.to_end().into_owned();
        w.write_event(Event::Start(property))?;
        w.create_element(&change.name)
            .write_text_content(BytesText::new(&change.value))?;
        w.write_event(Event::End(property_end))?;
    }
    w.write_event(Event::End(root_end))?;
    Ok(String::from_utf8(w.into_inner())?)
}

impl IntoXml for PropertyChange {
    fn write_xml(&self, w: &mut XmlWriter) -> std::io::Result<()> {
        w.create_element(&self.name)
            .write_text_content(BytesText::new(&self.value))
            .map(|_| ())
    }
}

/// POSTs a property-set NOTIFY for one changed-variable batch to a single
/// subscriber's callback URL, stamping the subscription's next `SEQ`. Errors
/// are swallowed into a log line, never propagated -- a subscriber that
/// stopped listening doesn't interrupt delivery to the others.
pub async fn deliver_notify(
    client: &reqwest::Client,
    subscriber: &Subscriber,
    seq: u32,
    changes: &[PropertyChange],
) {
    let body = match build_property_set(changes) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!("failed to build property-set body: {e}");
            return;
        }
    };
    let method = match reqwest::Method::from_bytes(b"NOTIFY") {
        Ok(method) => method,
        Err(_) => unreachable!("NOTIFY is a valid HTTP method token"),
    };
    let result = client
        .request(method, &subscriber.callback)
        .header("NT", "upnp:event")
        .header("NTS", "upnp:propchange")
        .header("SID", format!("uuid:{}", subscriber.sid))
        .header("SEQ", seq.to_string())
        .header(reqwest::header::CONTENT_TYPE, "text/xml")
        .body(body)
        .send()
        .await;
    match result {
        Ok(response) if !response.status().is_success() => {
            tracing::debug!(sid = %subscriber.sid, status = %response.status(), "subscriber rejected NOTIFY");
        }
        Err(e) => tracing::debug!(sid = %subscriber.sid, "failed to deliver NOTIFY: {e}"),
        Ok(_) => {}
    }
}

/// Parses a received `NOTIFY` body into the list of changed properties, the
/// control-point side of eventing.
pub fn parse_property_set(raw_xml: &[u8]) -> anyhow::Result<Vec<PropertyChange>> {
    let mut r = quick_xml::Reader::from_reader(raw_xml);
    let root = r.read_to_start()?;
    anyhow::ensure!(root.local_name().as_ref() == b"propertyset");
    let root = root.to_owned();
    let mut changes = Vec::new();

    loop {
        match r.read_event_err_eof()? {
            Event::Start(tag) if tag.local_name().as_ref() == b"property" => {
                let property_end = tag.to_end().into_owned();
                loop {
                    match r.read_event_err_eof()? {
                        Event::Start(var) => {
                            let name = String::from_utf8(var.local_name().into_inner().to_vec())?;
                            let value = r.read_text(var.name())?.into_owned();
                            changes.push(PropertyChange { name, value });
                        }
                        Event::End(end) if end == property_end => break,
                        _ => {}
                    }
                }
            }
            Event::End(end) if end == root.to_end() => break,
            _ => {}
        }
    }

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscribe_request() {
        let headers = [
            ("HOST", "192.168.1.5:1900"),
            ("CALLBACK", "<http://192.168.1.2:4004/notify>"),
            ("NT", "upnp:event"),
            ("TIMEOUT", "Second-1800"),
        ];
        let message = EventMessage::parse("SUBSCRIBE", headers.into_iter()).unwrap();
        match message {
            EventMessage::Subscribe { callback, nt, timeout } => {
                assert_eq!(callback, "http://192.168.1.2:4004/notify");
                assert_eq!(nt, "upnp:event");
                assert_eq!(timeout, 1800);
            }
            other => panic!("expected Subscribe, got {other:?}"),
        }
    }

    #[test]
    fn parses_renew_request() {
        let sid = uuid::Uuid::new_v4();
        let sid_header = format!("uuid:{sid}");
        let headers = [
            ("HOST", "192.168.1.5:1900"),
            ("SID", sid_header.as_str()),
            ("TIMEOUT", "Second-1800"),
        ];
        let message = EventMessage::parse("SUBSCRIBE", headers.into_iter()).unwrap();
        match message {
            EventMessage::Renew { sid: parsed, timeout } => {
                assert_eq!(parsed, sid);
                assert_eq!(timeout, 1800);
            }
            other => panic!("expected Renew, got {other:?}"),
        }
    }

    #[test]
    fn parses_unsubscribe_request() {
        let sid = uuid::Uuid::new_v4();
        let sid_header = format!("uuid:{sid}");
        let headers = [("HOST", "192.168.1.5:1900"), ("SID", sid_header.as_str())];
        let message = EventMessage::parse("UNSUBSCRIBE", headers.into_iter()).unwrap();
        match message {
            EventMessage::Unsubscribe { sid: parsed } => assert_eq!(parsed, sid),
            other => panic!("expected Unsubscribe, got {other:?}"),
        }
    }

    #[test]
    fn property_set_round_trips() {
        let changes = vec![PropertyChange {
            name: "SystemUpdateID".into(),
            value: "42".into(),
        }];
        let xml = build_property_set(&changes).unwrap();
        let parsed = parse_property_set(xml.as_bytes()).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "SystemUpdateID");
        assert_eq!(parsed[0].value, "42");
    }
}
