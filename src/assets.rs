use crate::error::{BlockPrintError, Result};
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorScheme {
    File,
    Data,
    Http,
    Https,
    Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    raw: String,
    scheme: LocatorScheme,
}

impl Locator {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || BlockPrintError::invalid_value("url", raw);
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }
        let scheme = match trimmed.split_once(':') {
            Some(("data", rest)) => {
                if !rest.contains(',') {
                    return Err(invalid());
                }
                LocatorScheme::Data
            }
            // Windows drive letters (`C:\...`) are paths, not schemes.
            Some((head, _)) if head.len() == 1 && head.chars().all(|c| c.is_ascii_alphabetic()) => {
                LocatorScheme::Path
            }
            Some((head, rest)) => {
                let scheme = match head.to_ascii_lowercase().as_str() {
                    "file" => LocatorScheme::File,
                    "http" => LocatorScheme::Http,
                    "https" => LocatorScheme::Https,
                    _ => return Err(invalid()),
                };
                if rest.is_empty() {
                    return Err(invalid());
                }
                scheme
            }
            None => LocatorScheme::Path,
        };
        if scheme != LocatorScheme::Data
            && trimmed.chars().any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(invalid());
        }
        Ok(Self {
            raw: trimmed.to_string(),
            scheme,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> &LocatorScheme {
        &self.scheme
    }

    pub fn path(&self) -> &str {
        let rest = match self.scheme {
            LocatorScheme::Data => return "",
            LocatorScheme::Path => self.raw.as_str(),
            LocatorScheme::File => self.raw[5..].trim_start_matches("//"),
            LocatorScheme::Http | LocatorScheme::Https => {
                let after = self.raw.split_once("://").map(|(_, r)| r).unwrap_or("");
                after.find('/').map(|i| &after[i..]).unwrap_or("")
            }
        };
        let end = rest.find(['?', '#']).unwrap_or(rest.len());
        &rest[..end]
    }

    pub fn media_type(&self) -> Option<String> {
        if self.scheme != LocatorScheme::Data {
            return None;
        }
        let header = self.raw[5..].split(',').next().unwrap_or("");
        header
            .split(';')
            .next()
            .filter(|v| !v.is_empty())
            .map(|v| v.trim().to_ascii_lowercase())
    }

    pub fn is_vector(&self) -> bool {
        if let Some(media) = self.media_type() {
            return media == "image/svg+xml";
        }
        self.path().to_ascii_lowercase().ends_with(".svg")
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

pub trait ResourceLoader: Send + Sync {
    fn load(&self, locator: &Locator) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Default)]
pub struct FsLoader {
    base_dir: Option<PathBuf>,
}

impl FsLoader {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    fn resolve_path(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl ResourceLoader for FsLoader {
    fn load(&self, locator: &Locator) -> Result<Vec<u8>> {
        match locator.scheme() {
            LocatorScheme::Data => decode_data_uri(locator.as_str()),
            LocatorScheme::File | LocatorScheme::Path => {
                let path = self.resolve_path(locator.path());
                std::fs::read(&path).map_err(|err| {
                    BlockPrintError::Resource(format!("{}: {err}", path.display()))
                })
            }
            LocatorScheme::Http | LocatorScheme::Https => Err(BlockPrintError::Resource(format!(
                "remote locator not supported: {locator}"
            ))),
        }
    }
}

fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    let bad = |why: &str| BlockPrintError::Resource(format!("data uri: {why}"));
    let body = uri.strip_prefix("data:").ok_or_else(|| bad("missing prefix"))?;
    let (header, payload) = body.split_once(',').ok_or_else(|| bad("missing payload"))?;
    if header.contains(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim().as_bytes())
            .map_err(|err| bad(&err.to_string()))
    } else {
        decode_percent_encoded(payload).ok_or_else(|| bad("bad percent escape"))
    }
}

fn decode_percent_encoded(input: &str) -> Option<Vec<u8>> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Some(out)
}

// Equal bytes share one resource.
pub fn resource_id(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(4 + digest.len() * 2);
    out.push_str("img:");
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[derive(Debug, Clone)]
pub struct Asset {
    pub name: String,
    pub data: Vec<u8>,
    pub source: Option<String>,
}

impl Asset {
    pub fn image(data: Vec<u8>, source: Option<String>) -> Self {
        Self {
            name: resource_id(&data),
            data,
            source,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssetBundle {
    assets: Vec<Asset>,
}

impl AssetBundle {
    pub fn add(&mut self, asset: Asset) {
        if self.get(&asset.name).is_none() {
            self.assets.push(asset);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.name == name)
    }

    pub fn extend(&mut self, other: AssetBundle) {
        for asset in other.assets {
            self.add(asset);
        }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.iter()
    }
}
