//! Export archive format
//!
//! A gzip-compressed tar stream:
//!
//! ```text
//! metadata/version                                   "1"
//! metadata/descriptor.json                           ExportDescriptor
//! resources/<qualified>/cluster/<name>.json          cluster-scoped object
//! resources/<qualified>/namespaces/<ns>/<name>.json  namespaced object
//! ```

use std::collections::BTreeMap;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use migrator_plugin::ResourceIdentifier;
use serde_json::Value;
use tar::{EntryType, Header};

use crate::error::EngineError;
use crate::export::ExportDescriptor;

/// Archive layout version written by this build
pub const ARCHIVE_VERSION: &str = "1";

const VERSION_PATH: &str = "metadata/version";
const DESCRIPTOR_PATH: &str = "metadata/descriptor.json";
const RESOURCES_DIR: &str = "resources";

fn item_path(resource: &str, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{RESOURCES_DIR}/{resource}/namespaces/{ns}/{name}.json"),
        None => format!("{RESOURCES_DIR}/{resource}/cluster/{name}.json"),
    }
}

/// Streams an export into an archive
pub struct ArchiveWriter<W: Write> {
    builder: tar::Builder<GzEncoder<W>>,
    items: usize,
}

impl<W: Write> ArchiveWriter<W> {
    /// Start an archive for `descriptor` on `writer`
    pub fn new(writer: W, descriptor: &ExportDescriptor) -> Result<Self, EngineError> {
        let encoder = GzBuilder::new()
            .filename("export.tar")
            .write(writer, Compression::default());
        let mut archive = Self {
            builder: tar::Builder::new(encoder),
            items: 0,
        };
        archive.append(VERSION_PATH, ARCHIVE_VERSION.as_bytes())?;
        archive.append(DESCRIPTOR_PATH, &serde_json::to_vec_pretty(descriptor)?)?;
        Ok(archive)
    }

    /// Add one object
    pub fn add(
        &mut self,
        resource: &str,
        namespace: Option<&str>,
        name: &str,
        object: &Value,
    ) -> Result<(), EngineError> {
        let data = serde_json::to_vec(object)?;
        self.append(&item_path(resource, namespace, name), &data)?;
        self.items += 1;
        Ok(())
    }

    /// Number of objects written so far
    pub fn items(&self) -> usize {
        self.items
    }

    /// Finish the tar stream and the gzip trailer, returning the writer
    pub fn finish(self) -> Result<W, EngineError> {
        let encoder = self.builder.into_inner()?;
        Ok(encoder.finish()?)
    }

    fn append(&mut self, path: &str, data: &[u8]) -> Result<(), EngineError> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        self.builder.append_data(&mut header, path, data)?;
        Ok(())
    }
}

/// One object read back from an archive
#[derive(Clone, Debug, PartialEq)]
pub struct ArchivedItem {
    /// Qualified resource name
    pub resource: String,
    /// Namespace, absent for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
    /// The stored object
    pub object: Value,
}

impl ArchivedItem {
    /// Identifier of this object
    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier {
            resource: self.resource.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// A fully read archive, items grouped by resource
#[derive(Clone, Debug)]
pub struct ExportArchive {
    descriptor: ExportDescriptor,
    items: BTreeMap<String, Vec<ArchivedItem>>,
}

impl ExportArchive {
    /// Read and validate an archive.
    ///
    /// Fails when the stream is not a gzip tar, the version is unknown, the
    /// descriptor is missing or an entry is outside the layout.
    pub fn read<R: Read>(reader: R) -> Result<Self, EngineError> {
        let corrupt = |e: std::io::Error| EngineError::archive(format!("corrupt archive: {}", e));

        let mut archive = tar::Archive::new(GzDecoder::new(reader));
        let mut version = None;
        let mut descriptor = None;
        let mut items: BTreeMap<String, Vec<ArchivedItem>> = BTreeMap::new();

        for entry in archive.entries().map_err(corrupt)? {
            let mut entry = entry.map_err(corrupt)?;
            if entry.header().entry_type().is_dir() {
                continue;
            }
            let path = entry.path().map_err(corrupt)?.to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).map_err(corrupt)?;

            match path.as_str() {
                VERSION_PATH => {
                    version = Some(String::from_utf8_lossy(&data).trim().to_string());
                }
                DESCRIPTOR_PATH => {
                    descriptor = Some(serde_json::from_slice::<ExportDescriptor>(&data).map_err(
                        |e| EngineError::archive(format!("invalid descriptor: {}", e)),
                    )?);
                }
                _ => {
                    let mut item = parse_item_path(&path)?;
                    item.object = serde_json::from_slice(&data)
                        .map_err(|e| EngineError::archive(format!("invalid object {}: {}", path, e)))?;
                    items.entry(item.resource.clone()).or_default().push(item);
                }
            }
        }

        match version.as_deref() {
            Some(ARCHIVE_VERSION) => {}
            Some(other) => {
                return Err(EngineError::archive(format!(
                    "unsupported archive version {}",
                    other
                )))
            }
            None => return Err(EngineError::archive("missing archive version")),
        }
        let descriptor = descriptor.ok_or_else(|| EngineError::archive("missing descriptor"))?;

        for list in items.values_mut() {
            list.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        }

        Ok(Self { descriptor, items })
    }

    /// Descriptor of the export the archive holds
    pub fn descriptor(&self) -> &ExportDescriptor {
        &self.descriptor
    }

    /// Qualified names of the resources present, sorted
    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    /// Objects of one resource, sorted by namespace then name
    pub fn items(&self, resource: &str) -> &[ArchivedItem] {
        self.items.get(resource).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Look up one object
    pub fn find(&self, id: &ResourceIdentifier) -> Option<&ArchivedItem> {
        self.items(&id.resource)
            .iter()
            .find(|i| i.namespace == id.namespace && i.name == id.name)
    }

    /// Total number of objects
    pub fn len(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    /// Whether the archive holds no objects
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_item_path(path: &str) -> Result<ArchivedItem, EngineError> {
    let unexpected = || EngineError::archive(format!("unexpected entry {}", path));
    let parts: Vec<&str> = path.split('/').collect();

    let (resource, namespace, file) = match parts.as_slice() {
        [RESOURCES_DIR, resource, "cluster", file] => (*resource, None, *file),
        [RESOURCES_DIR, resource, "namespaces", ns, file] => (*resource, Some(*ns), *file),
        _ => return Err(unexpected()),
    };
    let name = file.strip_suffix(".json").ok_or_else(unexpected)?;
    if resource.is_empty() || name.is_empty() || namespace == Some("") {
        return Err(unexpected());
    }

    Ok(ArchivedItem {
        resource: resource.to_string(),
        namespace: namespace.map(str::to_string),
        name: name.to_string(),
        object: Value::Null,
    })
}
