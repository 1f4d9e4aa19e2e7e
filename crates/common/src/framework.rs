//! Detected framework model and name-keyed merging
//!
//! A [`Framework`] is one identified piece of software. [`Frameworks`] keys
//! them by lowercased name so that several engines reporting the same product
//! collapse into one record whose provenance set remembers every engine.

use serde::{Serialize, Serializer};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::cpe::Attributes;

/// Provenance of a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum FrameFrom {
    #[serde(rename = "finger")]
    Default,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "ico")]
    Ico,
    #[serde(rename = "404")]
    NotFound,
    #[serde(rename = "guess")]
    Guess,
    #[serde(rename = "redirect")]
    Redirect,
    #[serde(rename = "fingerprinthub")]
    FingerprintHub,
    #[serde(rename = "wappalyzer")]
    Wappalyzer,
    #[serde(rename = "ehole")]
    EHole,
    #[serde(rename = "goby")]
    Goby,
    #[serde(rename = "nmap")]
    Nmap,
    #[serde(rename = "fingers")]
    Fingers,
}

impl FrameFrom {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            FrameFrom::Default => "finger",
            FrameFrom::Active => "active",
            FrameFrom::Ico => "ico",
            FrameFrom::NotFound => "404",
            FrameFrom::Guess => "guess",
            FrameFrom::Redirect => "redirect",
            FrameFrom::FingerprintHub => "fingerprinthub",
            FrameFrom::Wappalyzer => "wappalyzer",
            FrameFrom::EHole => "ehole",
            FrameFrom::Goby => "goby",
            FrameFrom::Nmap => "nmap",
            FrameFrom::Fingers => "fingers",
        }
    }

    /// Unknown strings map to [`FrameFrom::Default`].
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => FrameFrom::Active,
            "ico" => FrameFrom::Ico,
            "404" => FrameFrom::NotFound,
            "guess" => FrameFrom::Guess,
            "redirect" => FrameFrom::Redirect,
            "fingerprinthub" => FrameFrom::FingerprintHub,
            "wappalyzer" => FrameFrom::Wappalyzer,
            "ehole" => FrameFrom::EHole,
            "goby" => FrameFrom::Goby,
            "nmap" => FrameFrom::Nmap,
            "fingers" => FrameFrom::Fingers,
            _ => FrameFrom::Default,
        }
    }

    /// Engine provenances tag their frames with their own name.
    #[inline]
    #[must_use]
    pub fn is_engine(&self) -> bool {
        *self >= FrameFrom::FingerprintHub
    }
}

impl fmt::Display for FrameFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which matcher class produced a hit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchDetail {
    pub class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pattern: String,
}

impl MatchDetail {
    pub fn new(class: &str, index: Option<usize>, pattern: impl Into<String>) -> Self {
        Self {
            class: class.to_string(),
            index,
            pattern: pattern.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Framework {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub vendor: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub product: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(skip)]
    pub attributes: Attributes,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip)]
    pub from: FrameFrom,
    pub froms: BTreeSet<FrameFrom>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_focus: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_detail: Option<MatchDetail>,
}

impl Framework {
    pub fn new(name: impl Into<String>, from: FrameFrom) -> Self {
        let name = name.into();
        let mut frame = Self {
            attributes: Attributes::application(&name),
            name,
            vendor: String::new(),
            product: String::new(),
            version: String::new(),
            tags: Vec::new(),
            from,
            froms: BTreeSet::from([from]),
            is_focus: false,
            match_detail: None,
        };
        if from.is_engine() {
            frame.add_tag(from.as_str());
        }
        frame
    }

    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.set_version(version);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_focus(mut self, focus: bool) -> Self {
        self.is_focus = focus;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_detail(mut self, detail: Option<MatchDetail>) -> Self {
        self.match_detail = detail;
        self
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
        self.attributes.version.clone_from(&self.version);
    }

    /// Set vendor and product, mirroring them into the CPE attributes.
    pub fn set_vendor_product(&mut self, vendor: &str, product: &str) {
        if !vendor.is_empty() {
            self.vendor = vendor.to_string();
            self.attributes.vendor = vendor.to_string();
        }
        if !product.is_empty() {
            self.product = product.to_string();
            self.attributes.product = product.to_string();
        }
    }

    pub fn add_tag(&mut self, tag: &str) {
        if !self.has_tag(tag) {
            self.tags.push(tag.to_string());
        }
    }

    #[inline]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Record an additional provenance.
    #[inline]
    pub fn add_from(&mut self, from: FrameFrom) {
        self.froms.insert(from);
    }

    /// True when every provenance of this frame is a port guess.
    pub fn is_guess(&self) -> bool {
        !self.froms.is_empty() && self.froms.iter().all(|f| *f == FrameFrom::Guess)
    }

    /// Merge alias or engine supplied attributes. Part defaults to `a`.
    pub fn update_attributes(&mut self, attrs: &Attributes) {
        self.attributes.update_from(attrs);
        if self.attributes.part.is_empty() {
            self.attributes.part = "a".to_string();
        }
        if !attrs.vendor.is_empty() {
            self.vendor.clone_from(&attrs.vendor);
        }
        if !attrs.product.is_empty() {
            self.product.clone_from(&attrs.product);
        }
        if self.version.is_empty() {
            self.version.clone_from(&attrs.version);
        } else {
            self.attributes.version.clone_from(&self.version);
        }
    }

    pub fn cpe(&self) -> String {
        self.attributes.bind_to_fmt_string()
    }

    pub fn uri(&self) -> String {
        self.attributes.bind_to_uri()
    }

    pub fn wfn(&self) -> String {
        self.attributes.wfn_string()
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_focus {
            f.write_str("focus:")?;
        }
        f.write_str(&self.name)?;
        if !self.version.is_empty() {
            write!(f, ":{}", self.version.replace(':', "_"))?;
        }
        if self.froms.len() > 1 {
            let froms: Vec<&str> = self.froms.iter().map(FrameFrom::as_str).collect();
            write!(f, ":({})", froms.join(" "))?;
        } else if let Some(from) = self.froms.iter().next() {
            if *from != FrameFrom::Default {
                write!(f, ":{}", from)?;
            }
        }
        Ok(())
    }
}

/// Name-keyed, insertion ordered framework set.
#[derive(Debug, Clone, Default)]
pub struct Frameworks {
    frames: Vec<Framework>,
    index: HashMap<String, usize>,
}

impl Frameworks {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Framework> {
        self.frames.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Framework> {
        self.index
            .get(&name.to_lowercase())
            .map(|&i| &self.frames[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_lowercase())
    }

    /// First inserted frame.
    pub fn one(&self) -> Option<&Framework> {
        self.frames.first()
    }

    /// Insert or fold into the existing frame of the same name. Returns
    /// whether the name was new.
    pub fn add(&mut self, mut other: Framework) -> bool {
        other.name = other.name.to_lowercase();
        match self.index.get(&other.name) {
            Some(&i) => {
                let frame = &mut self.frames[i];
                frame.froms.insert(other.from);
                frame.froms.extend(other.froms.iter().copied());
                for tag in &other.tags {
                    frame.add_tag(tag);
                }
                if frame.version.is_empty() && !other.version.is_empty() {
                    frame.set_version(other.version);
                }
                frame.is_focus |= other.is_focus;
                if frame.match_detail.is_none() {
                    frame.match_detail = other.match_detail;
                }
                false
            }
            None => {
                self.index.insert(other.name.clone(), self.frames.len());
                self.frames.push(other);
                true
            }
        }
    }

    /// Fold every frame of `other`. Returns the number of new names.
    pub fn merge(&mut self, other: Frameworks) -> usize {
        let mut added = 0;
        for frame in other.frames {
            if self.add(frame) {
                added += 1;
            }
        }
        added
    }

    /// Names of every non-guess frame.
    pub fn names(&self) -> Vec<String> {
        self.frames
            .iter()
            .filter(|f| !f.is_guess())
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn is_focus(&self) -> bool {
        self.frames.iter().any(|f| f.is_focus)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.frames.iter().any(|f| f.has_tag(tag))
    }

    pub fn has_from(&self, from: &str) -> bool {
        let from = FrameFrom::parse(from);
        self.frames.iter().any(|f| f.froms.contains(&from))
    }

    pub fn cpes(&self) -> Vec<String> {
        self.frames.iter().map(Framework::cpe).collect()
    }

    pub fn uris(&self) -> Vec<String> {
        self.frames.iter().map(Framework::uri).collect()
    }

    pub fn wfns(&self) -> Vec<String> {
        self.frames.iter().map(Framework::wfn).collect()
    }

    /// `||` joined display, optionally hiding guesses.
    pub fn display(&self, no_guess: bool) -> String {
        self.frames
            .iter()
            .filter(|f| !(no_guess && f.is_guess()))
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("||")
    }
}

impl fmt::Display for Frameworks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display(false))
    }
}

impl Serialize for Frameworks {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.frames.iter())
    }
}

impl IntoIterator for Frameworks {
    type Item = Framework;
    type IntoIter = std::vec::IntoIter<Framework>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

impl FromIterator<Framework> for Frameworks {
    fn from_iter<I: IntoIterator<Item = Framework>>(iter: I) -> Self {
        let mut frames = Frameworks::new();
        for frame in iter {
            frames.add(frame);
        }
        frames
    }
}
