//! Schema storage
//!
//! A [`SchemaStore`] persists one registry's accepted descriptor set and its
//! resource bindings. [`GitStore`] keeps them as files in a git working tree
//! and records every accepted change as a commit; [`MemoryStore`] is the
//! process-local equivalent.
//!
//! A git store may track a remote as `origin`. It is cloned when the working
//! tree does not exist yet, fast-forwarded before every write and pushed
//! after every commit.
//!
//! ## Layout
//!
//! ```text
//! <registry path>/
//! ├── registry.pb          # serialized FileDescriptorSet
//! ├── registry.pb.sha256   # sha256sum line for registry.pb
//! └── bindings.json        # resource bindings
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{Commit, IndexAddOption, Repository, Signature};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::binding::Bindings;
use crate::checksum::Checksum;
use crate::error::{LoadError, RegistryError, Result};

pub const SCHEMA_FILE: &str = "registry.pb";
pub const CHECKSUM_FILE: &str = "registry.pb.sha256";
pub const BINDINGS_FILE: &str = "bindings.json";
pub const REMOTE_NAME: &str = "origin";

const DEFAULT_AUTHOR: &str = "Schema Registry";
const DEFAULT_EMAIL: &str = "registry@localhost";
const DEFAULT_MESSAGE: &str = "No message provided";

/// Who changed the registry and why
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub description: String,
}

impl Comment {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.name = name.into();
        self.email = email.into();
        self
    }

    /// Commit message; the description or a placeholder
    pub fn message(&self) -> &str {
        if self.description.trim().is_empty() {
            DEFAULT_MESSAGE
        } else {
            &self.description
        }
    }

    fn signature(&self) -> std::result::Result<Signature<'static>, git2::Error> {
        let name = if self.name.is_empty() { DEFAULT_AUTHOR } else { &self.name };
        let email = if self.email.is_empty() { DEFAULT_EMAIL } else { &self.email };
        Signature::now(name, email)
    }
}

/// Persistence for one registry
pub trait SchemaStore: Send {
    /// The stored descriptor set, or None if nothing was ever stored
    fn read_schema(&self) -> Result<Option<Vec<u8>>>;

    fn read_bindings(&self) -> Result<Bindings>;

    /// Persist schema and bindings. Returns false when the stored state was
    /// already identical and nothing was recorded.
    fn write(&mut self, schema: &[u8], bindings: &Bindings, comment: &Comment) -> Result<bool>;
}

// =============================================================================
// Memory
// =============================================================================

/// Process-local store that keeps the comment of every recorded change
#[derive(Debug, Default)]
pub struct MemoryStore {
    schema: Option<Vec<u8>>,
    bindings: Bindings,
    history: Vec<Comment>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Comments of recorded changes, oldest first
    pub fn history(&self) -> &[Comment] {
        &self.history
    }
}

impl SchemaStore for MemoryStore {
    fn read_schema(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.schema.clone())
    }

    fn read_bindings(&self) -> Result<Bindings> {
        Ok(self.bindings.clone())
    }

    fn write(&mut self, schema: &[u8], bindings: &Bindings, comment: &Comment) -> Result<bool> {
        if self.schema.as_deref() == Some(schema) && self.bindings == *bindings {
            return Ok(false);
        }
        self.schema = Some(schema.to_vec());
        self.bindings = bindings.clone();
        self.history.push(comment.clone());
        Ok(true)
    }
}

// =============================================================================
// Git
// =============================================================================

/// Git-backed store: every accepted change is a commit
pub struct GitStore {
    root: PathBuf,
    repo: Repository,
    remote: Option<String>,
}

impl GitStore {
    /// Open the repository at `path`, initializing it if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_remote(path, None)
    }

    /// Open the repository at `path` and keep it in sync with `remote`.
    ///
    /// A missing repository is cloned from the remote. An existing one gets
    /// the remote added as `origin` if it has none, then is fast-forwarded.
    pub fn open_with_remote(path: impl AsRef<Path>, remote: Option<&str>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let repo = match (Repository::open(&root), remote) {
            (Ok(repo), _) => repo,
            (Err(_), Some(url)) => {
                info!(path = %root.display(), remote = url, "cloning registry repository");
                Repository::clone(url, &root)?
            }
            (Err(_), None) => {
                info!(path = %root.display(), "initializing registry repository");
                Repository::init(&root)?
            }
        };
        if let Some(url) = remote {
            if repo.find_remote(REMOTE_NAME).is_err() {
                repo.remote(REMOTE_NAME, url)?;
            }
        }

        let store = Self {
            root,
            repo,
            remote: remote.map(str::to_string),
        };
        store.pull()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of commits reachable from HEAD
    pub fn commit_count(&self) -> Result<usize> {
        if self.head_commit().is_none() {
            return Ok(0);
        }
        let mut walk = self.repo.revwalk()?;
        walk.push_head()?;
        Ok(walk.count())
    }

    /// Message of the HEAD commit
    pub fn last_message(&self) -> Option<String> {
        self.head_commit()
            .and_then(|commit| commit.message().map(str::to_string))
    }

    /// Fetch the remote and fast-forward the current branch to it.
    ///
    /// Returns true when HEAD moved. A store without a remote, or a remote
    /// that has no such branch yet, is left as is. Diverged history is an
    /// error.
    pub fn pull(&self) -> Result<bool> {
        if self.remote.is_none() {
            return Ok(false);
        }
        let branch = self.branch_ref()?;
        let mut remote = self.repo.find_remote(REMOTE_NAME)?;
        remote.fetch(&[] as &[&str], None, None)?;

        let tracking = format!(
            "refs/remotes/{}/{}",
            REMOTE_NAME,
            branch.trim_start_matches("refs/heads/")
        );
        let fetched = match self.repo.find_reference(&tracking) {
            Ok(reference) => reference.peel_to_commit()?,
            Err(_) => return Ok(false),
        };
        if let Some(local) = self.head_commit() {
            if local.id() == fetched.id() || self.repo.graph_descendant_of(local.id(), fetched.id())? {
                return Ok(false);
            }
            if !self.repo.graph_descendant_of(fetched.id(), local.id())? {
                return Err(git2::Error::from_str("registry history diverged from its remote").into());
            }
        }

        self.repo.reference(&branch, fetched.id(), true, "registry: fast-forward")?;
        self.repo.set_head(&branch)?;
        self.repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
        info!(commit = %fetched.id(), "registry fast-forwarded from remote");
        Ok(true)
    }

    fn push(&self) -> Result<()> {
        if self.remote.is_none() {
            return Ok(());
        }
        let branch = self.branch_ref()?;
        let mut remote = self.repo.find_remote(REMOTE_NAME)?;
        remote.push(&[format!("{0}:{0}", branch)], None)?;
        info!(branch = branch.as_str(), "registry changes pushed");
        Ok(())
    }

    /// Full name of the branch HEAD points at, born or not
    fn branch_ref(&self) -> Result<String> {
        let head = self.repo.find_reference("HEAD")?;
        head.symbolic_target()
            .map(str::to_string)
            .ok_or_else(|| RegistryError::from(git2::Error::from_str("registry HEAD is detached")))
    }

    fn head_commit(&self) -> Option<Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }

    fn write_if_changed(&self, name: &str, content: &[u8]) -> Result<bool> {
        let path = self.root.join(name);
        if fs::read(&path).map(|existing| existing == content).unwrap_or(false) {
            return Ok(false);
        }
        fs::write(&path, content)?;
        Ok(true)
    }

    /// Stage the registry files and commit if the tree differs from HEAD
    fn commit(&self, comment: &Comment) -> Result<bool> {
        let mut index = self.repo.index()?;
        index.add_all(
            [SCHEMA_FILE, CHECKSUM_FILE, BINDINGS_FILE].iter(),
            IndexAddOption::DEFAULT,
            None,
        )?;
        index.write()?;

        let oid = index.write_tree()?;
        let parent = self.head_commit();
        if parent.as_ref().map(|c| c.tree_id()) == Some(oid) {
            debug!("no changes to commit");
            return Ok(false);
        }

        let tree = self.repo.find_tree(oid)?;
        let sig = comment.signature()?;
        let parents: Vec<&Commit> = parent.iter().collect();
        let commit = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, comment.message(), &tree, &parents)?;
        info!(commit = %commit, "registry change committed");
        Ok(true)
    }
}

impl SchemaStore for GitStore {
    fn read_schema(&self) -> Result<Option<Vec<u8>>> {
        let path = self.root.join(SCHEMA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;

        let checksum_path = self.root.join(CHECKSUM_FILE);
        if checksum_path.exists() {
            let content = fs::read_to_string(&checksum_path)?;
            if let Some((expected, _)) = Checksum::parse_line(&content) {
                if !expected.verify(&bytes) {
                    return Err(LoadError::ChecksumMismatch {
                        expected: expected.to_string(),
                        actual: Checksum::from_bytes(&bytes).to_string(),
                    }
                    .into());
                }
            }
        }

        Ok(Some(bytes))
    }

    fn read_bindings(&self) -> Result<Bindings> {
        let path = self.root.join(BINDINGS_FILE);
        if !path.exists() {
            return Ok(Bindings::new());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write(&mut self, schema: &[u8], bindings: &Bindings, comment: &Comment) -> Result<bool> {
        self.pull()?;
        self.write_if_changed(SCHEMA_FILE, schema)?;
        self.write_if_changed(
            CHECKSUM_FILE,
            Checksum::from_bytes(schema).to_line(SCHEMA_FILE).as_bytes(),
        )?;
        let bindings_json = serde_json::to_string_pretty(bindings)?;
        self.write_if_changed(BINDINGS_FILE, bindings_json.as_bytes())?;

        let committed = self.commit(comment)?;
        if committed {
            self.push()?;
        }
        Ok(committed)
    }
}
