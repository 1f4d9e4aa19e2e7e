//! Service fingerprint produced by a probe match

use serde::{Deserialize, Serialize};
use sigil_common::{Attributes, FrameFrom, Framework};

use crate::protocol::fix_protocol;

/// Outcome of matching one response against a probe's match group.
///
/// `service` is empty when nothing matched. A softmatch fills `service` only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FingerPrint {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub probe_name: String,
    #[serde(default, rename = "match_regex", skip_serializing_if = "String::is_empty")]
    pub match_regex: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub product_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub info: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operating_system: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cpes: Vec<String>,
    #[serde(skip)]
    pub cpe_attributes: Vec<Attributes>,
}

impl FingerPrint {
    #[inline]
    pub fn is_matched(&self) -> bool {
        !self.service.is_empty()
    }

    /// One framework per application CPE, or a single framework built from
    /// the product and version fields.
    pub fn to_frameworks(&self) -> Vec<Framework> {
        if self.service.is_empty() {
            return Vec::new();
        }
        let service = fix_protocol(&self.service);

        let apps: Vec<&Attributes> = self
            .cpe_attributes
            .iter()
            .filter(|attr| attr.part == "a")
            .collect();

        if apps.is_empty() {
            return vec![self.populate(&service, None)];
        }
        apps.into_iter()
            .map(|attr| self.populate(&service, Some(attr)))
            .collect()
    }

    fn populate(&self, service: &str, cpe: Option<&Attributes>) -> Framework {
        let mut frame = Framework::new(service, FrameFrom::Nmap);
        match cpe {
            Some(attr) => {
                frame.update_attributes(attr);
                if !attr.product.is_empty() {
                    frame.product.clone_from(&attr.product);
                }
                if !attr.version.is_empty() {
                    frame.set_version(attr.version.as_str());
                }
                if !attr.vendor.is_empty() {
                    frame.add_tag(&format!("vendor:{}", attr.vendor));
                }
            }
            None => {
                if !self.product_name.is_empty() {
                    frame.product.clone_from(&self.product_name);
                }
                if !self.version.is_empty() {
                    frame.set_version(self.version.as_str());
                }
            }
        }

        if !self.info.is_empty() {
            frame.add_tag(&self.info);
        }
        if !self.hostname.is_empty() {
            frame.add_tag(&format!("hostname:{}", self.hostname));
        }
        if !self.device_type.is_empty() {
            frame.add_tag(&format!("device:{}", self.device_type));
        }
        for (cpe, attr) in self.cpes.iter().zip(&self.cpe_attributes) {
            if attr.part == "a" {
                frame.add_tag(&format!("cpe:{}", cpe));
            }
        }
        frame.add_from(FrameFrom::Active);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis() -> FingerPrint {
        let cpes = vec![
            "cpe:/a:redislabs:redis:6.0.9".to_string(),
            "cpe:/o:linux:linux_kernel".to_string(),
        ];
        FingerPrint {
            service: "redis".into(),
            product_name: "Redis key-value store".into(),
            version: "6.0.9".into(),
            info: "Protected mode".into(),
            cpe_attributes: cpes.iter().map(|c| Attributes::parse(c).unwrap()).collect(),
            cpes,
            ..Default::default()
        }
    }

    #[test]
    fn application_cpes_drive_frames() {
        let frames = redis().to_frameworks();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.name, "redis");
        assert_eq!(frame.product, "redis");
        assert_eq!(frame.version, "6.0.9");
        assert!(frame.has_tag("vendor:redislabs"));
        assert!(frame.has_tag("Protected mode"));
        assert!(frame.has_tag("cpe:cpe:/a:redislabs:redis:6.0.9"));
        assert!(!frame.has_tag("cpe:cpe:/o:linux:linux_kernel"));
        assert!(frame.froms.contains(&FrameFrom::Nmap));
        assert!(frame.froms.contains(&FrameFrom::Active));
    }

    #[test]
    fn product_fields_without_cpe() {
        let fp = FingerPrint {
            service: "ms-wbt-server".into(),
            product_name: "Microsoft Terminal Services".into(),
            hostname: "DC01".into(),
            device_type: "general purpose".into(),
            ..Default::default()
        };
        let frames = fp.to_frameworks();
        assert_eq!(frames[0].name, "rdp");
        assert_eq!(frames[0].product, "Microsoft Terminal Services");
        assert!(frames[0].has_tag("hostname:DC01"));
        assert!(frames[0].has_tag("device:general purpose"));
        assert!(FingerPrint::default().to_frameworks().is_empty());
    }
}
