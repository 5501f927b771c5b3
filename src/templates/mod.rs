use std::{borrow::Cow, fmt::Display};

use quick_xml::events::{BytesStart, BytesText, Event};
use serde::{Deserialize, Serialize};

use crate::{FromXml, IntoXml, XmlReaderExt};

pub mod service_description;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecVersion {
    pub major: usize,
    pub minor: usize,
}

impl SpecVersion {
    /// UPnP2.0 spec version
    pub const fn upnp_v2() -> Self {
        Self { major: 2, minor: 0 }
    }
    pub const fn upnp_v1_1() -> Self {
        Self { major: 1, minor: 1 }
    }
    pub const fn upnp_v1() -> Self {
        Self { major: 1, minor: 0 }
    }
}

impl IntoXml for SpecVersion {
    fn write_xml(&self, w: &mut crate::XmlWriter) -> std::io::Result<()> {
        let parent = BytesStart::new("specVersion");
        let parent_end = parent.to_end().into_owned();
        w.write_event(Event::Start(parent))?;
        w.create_element("major")
            .write_text_content(BytesText::new(&self.major.to_string()))?;
        w.create_element("minor")
            .write_text_content(BytesText::new(&self.minor.to_string()))?;
        w.write_event(Event::End(parent_end))
    }
}

impl<'a> FromXml<'a> for SpecVersion {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let start = r.read_to_start()?;
        anyhow::ensure!(start.local_name().as_ref() == b"specVersion");
        let mut major = None;
        let mut minor = None;
        loop {
            match r.read_event_err_eof()? {
                Event::Start(tag) => match tag.local_name().as_ref() {
                    b"major" => major = Some(r.read_text(tag.name())?.parse()?),
                    b"minor" => minor = Some(r.read_text(tag.name())?.parse()?),
                    _ => {
                        r.read_to_end(tag.name())?;
                    }
                },
                Event::End(end) if end.local_name().as_ref() == b"specVersion" => break,
                _ => {}
            }
        }
        Ok(Self {
            major: major.unwrap_or(1),
            minor: minor.unwrap_or(0),
        })
    }
}

/// `SERVER`/`USER-AGENT` header value, e.g. `Linux/6.1 UPnP/1.1 upnp-rs/0.1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpnpAgent<'a> {
    pub os: Cow<'a, str>,
    pub os_version: Cow<'a, str>,
    pub upnp_major: usize,
    pub upnp_minor: usize,
    pub product: Cow<'a, str>,
    pub product_version: Cow<'a, str>,
}

impl UpnpAgent<'static> {
    pub fn new(product: impl Into<Cow<'static, str>>, product_version: impl Into<Cow<'static, str>>) -> Self {
        Self {
            os: Cow::Borrowed(std::env::consts::OS),
            os_version: Cow::Borrowed("0"),
            upnp_major: 1,
            upnp_minor: 1,
            product: product.into(),
            product_version: product_version.into(),
        }
    }
}

impl Default for UpnpAgent<'static> {
    fn default() -> Self {
        Self::new("upnp-rs", env!("CARGO_PKG_VERSION"))
    }
}

impl Display for UpnpAgent<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} UPnP/{}.{} {}/{}",
            self.os,
            self.os_version,
            self.upnp_major,
            self.upnp_minor,
            self.product,
            self.product_version,
        )
    }
}
