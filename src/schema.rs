//! The embedded schema pool and the seam where a caller's own `prost::Message` type
//! plugs into the engine as a content or metadata schema.

use std::collections::{HashMap, HashSet};

use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor};
use prost_types::{FileDescriptorProto, FileDescriptorSet};

use crate::error::{A4Error as Error, A4Result as Result};

/// The convention this format uses to discover a message's class id from its own embedded
/// descriptor: a field literally named `CLASS_ID`, whose field *number* (not value) carries
/// the numeric tag.
const CLASS_ID_FIELD_NAME: &str = "CLASS_ID";

/// Binds a caller's `prost::Message` type to the class id and schema closure it is written
/// and announced under.
///
/// Implementors are ordinarily generated ahead of time by `prost-build`/`protoc`, outside
/// this crate. [`descriptor_closure`](Self::descriptor_closure) has a default implementation
/// in terms of [`closure`]; it only needs the message's own descriptor and the
/// `FileDescriptorSet` it was compiled against (`prost-build` emits this as a
/// `FILE_DESCRIPTOR_SET` byte constant, decodable into `FileDescriptorSet`).
pub trait ClassMessage: Message + Default + Sized {
    /// The numeric class id this message is written and announced under. Must be
    /// `>= FIRST_CUSTOM_MESSAGE_CLASS` (see [`crate::records::FIRST_CUSTOM_MESSAGE_CLASS`]).
    const CLASS_ID: u32;

    /// This message's own file descriptor.
    fn file_descriptor() -> FileDescriptorProto;

    /// The full set of file descriptors this message's file was compiled against, used to
    /// resolve `dependency` names while computing the transitive closure.
    fn file_descriptor_set() -> FileDescriptorSet;

    /// The transitive closure of file descriptors that must be announced before this
    /// message's first use: dependencies before dependents, each file once.
    fn descriptor_closure() -> Vec<FileDescriptorProto> {
        closure(&Self::file_descriptor(), &Self::file_descriptor_set())
    }
}

/// Computes the transitive closure of `start`'s dependencies within `universe`: dependencies
/// appended before dependents, each file included at most once.
///
/// Dependencies are recursed into before the dependent file is appended, so the result is
/// always safe to announce in order.
pub fn closure(start: &FileDescriptorProto, universe: &FileDescriptorSet) -> Vec<FileDescriptorProto> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    closure_into(start, universe, &mut seen, &mut out);
    out
}

fn closure_into(
    file: &FileDescriptorProto,
    universe: &FileDescriptorSet,
    seen: &mut HashSet<String>,
    out: &mut Vec<FileDescriptorProto>,
) {
    let name = file.name().to_string();
    if !seen.insert(name.clone()) {
        return;
    }
    for dep_name in &file.dependency {
        match universe.file.iter().find(|f| f.name() == dep_name.as_str()) {
            Some(dep) => closure_into(dep, universe, seen, out),
            None => log::warn!(
                "schema file {name} declares a dependency on {dep_name}, which is not present \
                 in its descriptor set"
            ),
        }
    }
    out.push(file.clone());
}

/// Reads the class id a message descriptor declares, via the `CLASS_ID` field-number
/// convention. Returns `None` if the message has no such field.
pub fn class_id_of(descriptor: &MessageDescriptor) -> Option<u32> {
    descriptor
        .fields()
        .find(|f| f.name() == CLASS_ID_FIELD_NAME)
        .map(|f| f.number() as u32)
}

/// The reader's registry of `class_id -> decoder`, built up from in-band `Proto`
/// announcements as they are encountered.
#[derive(Default)]
pub struct SchemaPool {
    pool: DescriptorPool,
    by_class_id: HashMap<u32, MessageDescriptor>,
    announced_files: HashSet<String>,
}

impl SchemaPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a file descriptor, discovering any class ids its messages declare.
    ///
    /// Re-registering an already-announced file (by name) is a no-op, logged at `debug`.
    pub fn add_file_descriptor(&mut self, fdp: FileDescriptorProto) -> Result<()> {
        let name = fdp.name().to_string();
        if self.announced_files.contains(&name) {
            log::debug!("schema file {name} already registered; ignoring re-announcement");
            return Ok(());
        }
        self.pool.add_file_descriptor_proto(fdp)?;
        self.announced_files.insert(name.clone());
        if let Some(file) = self.pool.get_file_by_name(&name) {
            for message in file.messages() {
                if let Some(class_id) = class_id_of(&message) {
                    self.by_class_id.insert(class_id, message);
                }
            }
        }
        Ok(())
    }

    /// Whether a decoder is registered for `class_id`.
    pub fn is_known(&self, class_id: u32) -> bool {
        self.by_class_id.contains_key(&class_id)
    }

    /// Decodes `payload` as the message registered under `class_id`.
    pub fn decode(&self, class_id: u32, payload: &[u8]) -> Result<DynamicMessage> {
        let descriptor = self
            .by_class_id
            .get(&class_id)
            .ok_or(Error::UnknownClassId(class_id))?;
        Ok(DynamicMessage::decode(descriptor.clone(), payload)?)
    }
}
