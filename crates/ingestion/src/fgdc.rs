//! FGDC side-metadata parser.
//!
//! FGDC text files are an indentation-structured list of `Key: value` lines:
//!
//! ```text
//! Metadata:
//!   Identification_Information:
//!     Citation:
//!       Citation_Information:
//!         Title: NAIP Digital Ortho Photo Image
//!     Description:
//!       Abstract:
//!         This data set contains imagery from the National
//!         Agriculture Imagery Program (NAIP).
//! ```
//!
//! A key never contains spaces. A key with a value is a leaf; a key without
//! one opens a group nested two columns deeper. A line that is not a key
//! starts free text, which swallows every following line of the same group
//! and becomes the group's value.

use std::collections::BTreeMap;

use crate::error::{Result, StacError};

/// Path to the record's resource name inside the `Metadata` group.
pub const RESOURCE_DESCRIPTION: &[&str] = &["Distribution_Information", "Resource_Description"];

/// Path to the acquisition date inside the `Metadata` group.
pub const CALENDAR_DATE: &[&str] = &[
    "Identification_Information",
    "Time_Period_of_Content",
    "Time_Period_Information",
    "Single_Date/Time",
    "Calendar_Date",
];

const ROOT_KEY: &str = "Metadata";
const GROUP_INDENT_STEP: usize = 2;

/// A parsed FGDC node.
#[derive(Debug, Clone, PartialEq)]
pub enum FgdcValue {
    Text(String),
    Group(BTreeMap<String, FgdcValue>),
}

impl FgdcValue {
    /// Follow a key path through nested groups.
    pub fn get_path(&self, path: &[&str]) -> Option<&FgdcValue> {
        path.iter().try_fold(self, |node, key| match node {
            FgdcValue::Group(children) => children.get(*key),
            FgdcValue::Text(_) => None,
        })
    }

    /// Text value at `path`, if the path ends in a leaf.
    pub fn text_at(&self, path: &[&str]) -> Option<&str> {
        match self.get_path(path)? {
            FgdcValue::Text(text) => Some(text.as_str()),
            FgdcValue::Group(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FgdcValue::Text(text) => text.is_empty(),
            FgdcValue::Group(children) => children.is_empty(),
        }
    }
}

/// One non-blank line split into its parts.
struct Line<'a> {
    indent: usize,
    /// Text before the first ':' (or the whole line when there is none)
    head: &'a str,
    has_colon: bool,
    value: &'a str,
    trimmed: &'a str,
}

impl<'a> Line<'a> {
    fn split(line: &'a str) -> Self {
        let body = line.trim_start();
        let indent = line.len() - body.len();
        let (head, has_colon, value) = match body.split_once(':') {
            Some((head, rest)) => (head, true, rest.trim()),
            None => (body, false, ""),
        };
        Line {
            indent,
            head,
            has_colon,
            value,
            trimmed: body.trim(),
        }
    }

    fn is_key(&self) -> bool {
        self.has_colon && !self.head.is_empty() && !self.head.contains(char::is_whitespace)
    }
}

fn normalize(line: &str) -> String {
    line.replace("^M", "").replace('\r', "").replace('\t', "    ")
}

/// Parse FGDC text and return the contents of its `Metadata` group.
pub fn parse_fgdc(text: &str) -> Result<FgdcValue> {
    let lines: Vec<String> = text
        .split('\n')
        .map(normalize)
        .filter(|l| !l.trim().is_empty())
        .collect();

    let mut pos = 0;
    let root = parse_group(&lines, &mut pos, 0);

    match root {
        FgdcValue::Group(mut children) => match children.remove(ROOT_KEY) {
            Some(metadata @ FgdcValue::Group(_)) => Ok(metadata),
            Some(FgdcValue::Text(_)) => Err(StacError::MetadataParse(
                "Metadata is free text, expected a group".to_string(),
            )),
            None => Err(StacError::MetadataParse(
                "document has no Metadata group".to_string(),
            )),
        },
        FgdcValue::Text(_) => Err(StacError::MetadataParse(
            "document has no Metadata group".to_string(),
        )),
    }
}

fn parse_group(lines: &[String], pos: &mut usize, group_indent: usize) -> FgdcValue {
    let mut children = BTreeMap::new();
    let mut text: Option<String> = None;

    while let Some(raw) = lines.get(*pos) {
        let line = Line::split(raw);
        if line.indent < group_indent {
            break;
        }
        *pos += 1;

        if let Some(text) = text.as_mut() {
            text.push(' ');
            text.push_str(line.trimmed);
            continue;
        }

        if line.is_key() {
            let key = line.head.to_string();
            if line.value.is_empty() {
                let child = parse_group(lines, pos, group_indent + GROUP_INDENT_STEP);
                children.insert(key, child);
            } else {
                children.insert(key, FgdcValue::Text(line.value.to_string()));
            }
        } else {
            text = Some(line.trimmed.to_string());
        }
    }

    match text {
        Some(text) => FgdcValue::Text(text),
        None => FgdcValue::Group(children),
    }
}
