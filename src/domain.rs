//! Schema Domain
//!
//! An immutable, indexed view over a set of protobuf file descriptors.
//! Lookups by file name, package, and qualified type name are O(1) via
//! HashMap indexes; import edges live in a petgraph `DiGraph` so the
//! transitive dependency closure of any set of files is a graph walk.
//!
//! Every message, enum and service (nested types included) must have a
//! globally unique qualified name. Construction rejects duplicates since a
//! diff between ambiguous identities is meaningless.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::DfsPostOrder;
use prost::Message;
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    ServiceDescriptorProto,
};
use tracing::debug;

use crate::error::LoadError;

// Field numbers of the descriptor.proto declarations, used to build
// SourceCodeInfo location paths.
const FILE_MESSAGE_TYPE: i32 = 4;
const FILE_ENUM_TYPE: i32 = 5;
const FILE_SERVICE: i32 = 6;
const MESSAGE_NESTED_TYPE: i32 = 3;
const MESSAGE_ENUM_TYPE: i32 = 4;

/// A message declaration and where it lives.
#[derive(Debug, Clone)]
pub struct MessageDef {
    pub qualified_name: String,
    /// Name of the declaring file
    pub file: String,
    pub proto: DescriptorProto,
    /// Qualified names of directly nested messages, in declaration order
    pub nested_messages: Vec<String>,
    /// Qualified names of directly nested enums, in declaration order
    pub nested_enums: Vec<String>,
    /// SourceCodeInfo path of this declaration within its file
    pub source_path: Vec<i32>,
}

/// An enum declaration and where it lives.
#[derive(Debug, Clone)]
pub struct EnumDef {
    pub qualified_name: String,
    pub file: String,
    pub proto: EnumDescriptorProto,
    pub source_path: Vec<i32>,
}

/// A service declaration and where it lives.
#[derive(Debug, Clone)]
pub struct ServiceDef {
    pub qualified_name: String,
    pub file: String,
    pub proto: ServiceDescriptorProto,
    pub source_path: Vec<i32>,
}

/// Result of a qualified-name lookup.
#[derive(Debug, Clone, Copy)]
pub enum TypeRef<'a> {
    Message(&'a MessageDef),
    Enum(&'a EnumDef),
    Service(&'a ServiceDef),
}

impl TypeRef<'_> {
    /// Declaring file name
    pub fn file(&self) -> &str {
        match self {
            TypeRef::Message(m) => &m.file,
            TypeRef::Enum(e) => &e.file,
            TypeRef::Service(s) => &s.file,
        }
    }
}

/// Top-level declarations of one file, by qualified name.
#[derive(Debug, Clone, Default)]
pub struct FileTypes {
    pub messages: Vec<String>,
    pub enums: Vec<String>,
    pub services: Vec<String>,
}

/// Immutable snapshot of a descriptor graph
#[derive(Debug, Clone)]
pub struct ProtoDomain {
    files: Vec<FileDescriptorProto>,
    file_types: Vec<FileTypes>,
    by_file_name: HashMap<String, usize>,
    messages: HashMap<String, MessageDef>,
    enums: HashMap<String, EnumDef>,
    services: HashMap<String, ServiceDef>,
    /// File import graph; node weights are indexes into `files`
    imports: DiGraph<usize, ()>,
}

impl ProtoDomain {
    /// Start building a domain from individual file descriptors
    pub fn builder() -> DomainBuilder {
        DomainBuilder::default()
    }

    /// A domain with no files
    pub fn empty() -> Self {
        Self {
            files: Vec::new(),
            file_types: Vec::new(),
            by_file_name: HashMap::new(),
            messages: HashMap::new(),
            enums: HashMap::new(),
            services: HashMap::new(),
            imports: DiGraph::new(),
        }
    }

    /// Decode a serialized `FileDescriptorSet`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let set = FileDescriptorSet::decode(bytes)?;
        Self::builder().add_set(set).build()
    }

    /// Decode a list of serialized `FileDescriptorProto`s
    pub fn from_file_protos<I, B>(protos: I) -> Result<Self, LoadError>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut builder = Self::builder();
        for bytes in protos {
            builder = builder.add_bytes(bytes.as_ref())?;
        }
        builder.build()
    }

    /// Encode the domain as a `FileDescriptorSet`
    pub fn to_bytes(&self) -> Vec<u8> {
        self.file_descriptor_set().encode_to_vec()
    }

    pub fn file_descriptor_set(&self) -> FileDescriptorSet {
        FileDescriptorSet {
            file: self.files.clone(),
        }
    }

    pub fn files(&self) -> &[FileDescriptorProto] {
        &self.files
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn file_by_name(&self, name: &str) -> Option<&FileDescriptorProto> {
        self.by_file_name.get(name).map(|&idx| &self.files[idx])
    }

    /// Top-level declarations of a file
    pub fn file_types(&self, name: &str) -> Option<&FileTypes> {
        self.by_file_name.get(name).map(|&idx| &self.file_types[idx])
    }

    /// Files whose package equals `prefix` or is nested under it.
    ///
    /// The match respects dot boundaries: `foo` selects `foo` and `foo.bar`
    /// but not `foobar`. An empty prefix selects every file.
    pub fn files_by_package_prefix(&self, prefix: &str) -> Vec<&FileDescriptorProto> {
        self.files
            .iter()
            .filter(|f| package_matches_prefix(f.package(), prefix))
            .collect()
    }

    /// Files declaring exactly `package`
    pub fn files_by_package_name(&self, package: &str) -> Vec<&FileDescriptorProto> {
        self.files.iter().filter(|f| f.package() == package).collect()
    }

    pub fn type_by_qualified_name(&self, name: &str) -> Option<TypeRef<'_>> {
        let name = name.strip_prefix('.').unwrap_or(name);
        if let Some(m) = self.messages.get(name) {
            return Some(TypeRef::Message(m));
        }
        if let Some(e) = self.enums.get(name) {
            return Some(TypeRef::Enum(e));
        }
        self.services.get(name).map(TypeRef::Service)
    }

    pub fn message(&self, name: &str) -> Option<&MessageDef> {
        self.messages.get(name)
    }

    pub fn enum_type(&self, name: &str) -> Option<&EnumDef> {
        self.enums.get(name)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDef> {
        self.services.get(name)
    }

    /// Transitive closure of `seeds` over import edges.
    ///
    /// Files are returned dependencies-first, each once. Unknown seeds and
    /// imports missing from the domain are skipped.
    pub fn dependency_closure<'a, I>(&self, seeds: I) -> Vec<&FileDescriptorProto>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen: HashSet<NodeIndex> = HashSet::new();
        let mut result = Vec::new();

        for seed in seeds {
            let Some(&idx) = self.by_file_name.get(seed) else {
                debug!(file = seed, "closure seed not in domain");
                continue;
            };
            let mut dfs = DfsPostOrder::new(&self.imports, NodeIndex::new(idx));
            while let Some(node) = dfs.next(&self.imports) {
                if seen.insert(node) {
                    result.push(&self.files[self.imports[node]]);
                }
            }
        }

        result
    }

    /// Fuzzy "did you mean" candidates among type and file names
    pub fn suggest(&self, query: &str, limit: usize) -> Vec<String> {
        let matcher = SkimMatcherV2::default();
        let mut scored: Vec<(i64, &str)> = self
            .messages
            .keys()
            .chain(self.enums.keys())
            .chain(self.services.keys())
            .chain(self.by_file_name.keys())
            .filter_map(|name| {
                matcher
                    .fuzzy_match(name, query)
                    .map(|score| (score, name.as_str()))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, name)| name.to_string())
            .collect()
    }
}

/// Does `package` equal `prefix` or live under it?
pub(crate) fn package_matches_prefix(package: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match package.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('.'),
        None => false,
    }
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

/// Collects file descriptors before indexing them into a [`ProtoDomain`]
#[derive(Debug, Default)]
pub struct DomainBuilder {
    files: Vec<FileDescriptorProto>,
}

impl DomainBuilder {
    pub fn add(mut self, file: FileDescriptorProto) -> Self {
        self.files.push(file);
        self
    }

    pub fn add_set(mut self, set: FileDescriptorSet) -> Self {
        self.files.extend(set.file);
        self
    }

    /// Add one serialized `FileDescriptorProto`
    pub fn add_bytes(self, bytes: &[u8]) -> Result<Self, LoadError> {
        let file = FileDescriptorProto::decode(bytes)?;
        Ok(self.add(file))
    }

    pub fn build(self) -> Result<ProtoDomain, LoadError> {
        let mut indexer = Indexer::default();
        let mut by_file_name = HashMap::with_capacity(self.files.len());
        let mut file_types = Vec::with_capacity(self.files.len());

        for (pos, file) in self.files.iter().enumerate() {
            let name = file
                .name
                .as_deref()
                .filter(|n| !n.is_empty())
                .ok_or(LoadError::UnnamedFile(pos))?;
            if by_file_name.insert(name.to_string(), pos).is_some() {
                return Err(LoadError::DuplicateFile(name.to_string()));
            }
            file_types.push(indexer.index_file(name, file)?);
        }

        let mut imports = DiGraph::with_capacity(self.files.len(), self.files.len() * 2);
        let nodes: Vec<NodeIndex> = (0..self.files.len()).map(|i| imports.add_node(i)).collect();
        for (pos, file) in self.files.iter().enumerate() {
            for dependency in &file.dependency {
                match by_file_name.get(dependency) {
                    Some(&dep) => {
                        imports.add_edge(nodes[pos], nodes[dep], ());
                    }
                    None => debug!(
                        file = file.name(),
                        import = dependency.as_str(),
                        "import not present in domain"
                    ),
                }
            }
        }

        debug!(
            files = self.files.len(),
            messages = indexer.messages.len(),
            enums = indexer.enums.len(),
            services = indexer.services.len(),
            "built schema domain"
        );

        Ok(ProtoDomain {
            files: self.files,
            file_types,
            by_file_name,
            messages: indexer.messages,
            enums: indexer.enums,
            services: indexer.services,
            imports,
        })
    }
}

#[derive(Default)]
struct Indexer {
    /// qualified name -> declaring file, across every kind
    declared: HashMap<String, String>,
    messages: HashMap<String, MessageDef>,
    enums: HashMap<String, EnumDef>,
    services: HashMap<String, ServiceDef>,
}

impl Indexer {
    fn declare(&mut self, name: &str, file: &str) -> Result<(), LoadError> {
        match self.declared.entry(name.to_string()) {
            Entry::Occupied(existing) => Err(LoadError::DuplicateType {
                name: name.to_string(),
                first: existing.get().clone(),
                second: file.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(file.to_string());
                Ok(())
            }
        }
    }

    fn index_file(&mut self, file: &str, proto: &FileDescriptorProto) -> Result<FileTypes, LoadError> {
        let package = proto.package();
        let mut types = FileTypes::default();

        for (i, message) in proto.message_type.iter().enumerate() {
            let name = self.add_message(file, package, message, vec![FILE_MESSAGE_TYPE, i as i32])?;
            types.messages.push(name);
        }
        for (i, enum_type) in proto.enum_type.iter().enumerate() {
            let name = self.add_enum(file, package, enum_type, vec![FILE_ENUM_TYPE, i as i32])?;
            types.enums.push(name);
        }
        for (i, service) in proto.service.iter().enumerate() {
            let qualified_name = qualify(package, service.name());
            self.declare(&qualified_name, file)?;
            self.services.insert(
                qualified_name.clone(),
                ServiceDef {
                    qualified_name: qualified_name.clone(),
                    file: file.to_string(),
                    proto: service.clone(),
                    source_path: vec![FILE_SERVICE, i as i32],
                },
            );
            types.services.push(qualified_name);
        }

        Ok(types)
    }

    fn add_message(
        &mut self,
        file: &str,
        scope: &str,
        proto: &DescriptorProto,
        source_path: Vec<i32>,
    ) -> Result<String, LoadError> {
        let qualified_name = qualify(scope, proto.name());
        self.declare(&qualified_name, file)?;

        let mut nested_messages = Vec::with_capacity(proto.nested_type.len());
        for (i, nested) in proto.nested_type.iter().enumerate() {
            let mut path = source_path.clone();
            path.extend([MESSAGE_NESTED_TYPE, i as i32]);
            nested_messages.push(self.add_message(file, &qualified_name, nested, path)?);
        }

        let mut nested_enums = Vec::with_capacity(proto.enum_type.len());
        for (i, nested) in proto.enum_type.iter().enumerate() {
            let mut path = source_path.clone();
            path.extend([MESSAGE_ENUM_TYPE, i as i32]);
            nested_enums.push(self.add_enum(file, &qualified_name, nested, path)?);
        }

        self.messages.insert(
            qualified_name.clone(),
            MessageDef {
                qualified_name: qualified_name.clone(),
                file: file.to_string(),
                proto: proto.clone(),
                nested_messages,
                nested_enums,
                source_path,
            },
        );
        Ok(qualified_name)
    }

    fn add_enum(
        &mut self,
        file: &str,
        scope: &str,
        proto: &EnumDescriptorProto,
        source_path: Vec<i32>,
    ) -> Result<String, LoadError> {
        let qualified_name = qualify(scope, proto.name());
        self.declare(&qualified_name, file)?;
        self.enums.insert(
            qualified_name.clone(),
            EnumDef {
                qualified_name: qualified_name.clone(),
                file: file.to_string(),
                proto: proto.clone(),
                source_path,
            },
        );
        Ok(qualified_name)
    }
}
