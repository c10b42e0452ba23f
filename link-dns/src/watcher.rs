//! Resolver file reconciliation
//!
//! [`DnsWatcher`] installs the session's resolver content, optionally keeps
//! it in force against external rewrites, and puts the host's original file
//! back when the session ends.
//!
//! The watch loop observes the parent directory rather than the file itself,
//! so replacing the file by rename or deleting it is still seen.

use std::fs::Permissions;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{ResolvHandling, ResolvSettings};
use crate::error::{Error, Result};

/// Mode used when there is no original file to inherit from
pub const DEFAULT_MODE: u32 = 0o644;

/// Read the current resolver file, `None` if it does not exist
pub async fn read_snapshot(path: impl AsRef<Path>) -> Result<Option<Vec<u8>>> {
    let path = path.as_ref();
    match fs::read(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::debug!("{} does not exist, nothing to back up", path.display());
            Ok(None)
        }
        Err(e) => Err(Error::io("read", path, e)),
    }
}

/// Called with the error that ended the watch loop
pub type FailureHook = Arc<dyn Fn(Error) + Send + Sync>;

struct WatchTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owner of the resolver file for the duration of one session
pub struct DnsWatcher {
    settings: ResolvSettings,
    snapshot: Option<Vec<u8>>,
    backup: Option<PathBuf>,
    written: bool,
    task: Option<WatchTask>,
    on_failure: Option<FailureHook>,
}

impl DnsWatcher {
    /// Create a watcher for `settings.path`
    ///
    /// `snapshot` is the file content read before the session touched it, or
    /// `None` when there was no file.
    pub fn new(settings: ResolvSettings, snapshot: Option<Vec<u8>>) -> Self {
        Self {
            settings,
            snapshot,
            backup: None,
            written: false,
            task: None,
            on_failure: None,
        }
    }

    /// Report the error that ends the watch loop to `hook`
    ///
    /// A normal stop through [`restore`](Self::restore) does not call it.
    pub fn on_failure(mut self, hook: impl Fn(Error) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    /// Resolver file path managed by this watcher
    pub fn path(&self) -> &Path {
        &self.settings.path
    }

    /// Content captured before the session changed the file
    pub fn snapshot(&self) -> Option<&[u8]> {
        self.snapshot.as_deref()
    }

    /// Whether the background reconciliation loop is running
    pub fn is_watching(&self) -> bool {
        self.task
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    /// Install `desired` and, in watch mode, start enforcing it
    ///
    /// On failure everything applied so far stays recorded, so
    /// [`restore`](Self::restore) still undoes it.
    pub async fn establish(&mut self, desired: Vec<u8>) -> Result<()> {
        let path = self.settings.path.clone();

        let mode = if self.snapshot.is_some() {
            let backup = self.settings.backup_path();
            let mode = match fs::metadata(&path).await {
                Ok(meta) => meta.permissions().mode() & 0o7777,
                Err(e) => return Err(Error::io("stat", &path, e)),
            };
            fs::rename(&path, &backup)
                .await
                .map_err(|e| Error::io("back up", &path, e))?;
            log::debug!("Moved {} to {}", path.display(), backup.display());
            self.backup = Some(backup);
            mode
        } else {
            DEFAULT_MODE
        };

        self.written = true;
        write_atomic(&path, &desired, mode).await?;
        log::info!(
            "Installed DNS configuration in {} ({})",
            path.display(),
            self.settings.handling.description()
        );

        match self.settings.handling {
            ResolvHandling::Watch => self.start_watch(desired),
            ResolvHandling::WriteOnce => Ok(()),
        }
    }

    fn start_watch(&mut self, desired: Vec<u8>) -> Result<()> {
        let path = self.settings.path.clone();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // receiver gone means the loop already ended
            let _ = event_tx.send(res);
        })
        .map_err(|source| Error::Watch {
            path: path.clone(),
            source,
        })?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|source| Error::Watch {
                path: path.clone(),
                source,
            })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let on_failure = self.on_failure.clone();
        let handle = tokio::spawn(async move {
            match watch_loop(&path, &desired, event_rx, stop_rx, watcher).await {
                LoopExit::Stopped => log::debug!("Stopped watching {}", path.display()),
                LoopExit::Failed(e) => {
                    log::error!("watcher: {}", e);
                    if let Some(hook) = on_failure {
                        hook(e);
                    }
                }
            }
        });

        self.task = Some(WatchTask {
            stop: stop_tx,
            handle,
        });
        log::debug!("Watching {} for changes", self.settings.path.display());
        Ok(())
    }

    /// Stop enforcement and put the original file back
    ///
    /// Restores the backup when one was taken, otherwise deletes the file the
    /// session created. Safe to call more than once.
    pub async fn restore(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            let _ = task.stop.send(());
            if let Err(e) = task.handle.await {
                log::warn!("DNS watch task ended abnormally: {}", e);
            }
        }

        let path = &self.settings.path;
        if let Some(backup) = self.backup.take() {
            log::info!("Restoring original {}", path.display());
            fs::rename(&backup, path)
                .await
                .map_err(|e| Error::io("restore", path, e))?;
        } else if std::mem::take(&mut self.written) {
            log::info!("Removing custom {}", path.display());
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io("remove", path, e)),
            }
        }
        self.written = false;

        Ok(())
    }
}

impl std::fmt::Debug for DnsWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsWatcher")
            .field("path", &self.settings.path)
            .field("handling", &self.settings.handling)
            .field("backup", &self.backup)
            .field("watching", &self.is_watching())
            .finish_non_exhaustive()
    }
}

enum LoopExit {
    Stopped,
    Failed(Error),
}

async fn watch_loop(
    path: &Path,
    desired: &[u8],
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    mut stop: oneshot::Receiver<()>,
    _watcher: RecommendedWatcher,
) -> LoopExit {
    loop {
        if let Err(e) = reconcile(path, desired).await {
            return LoopExit::Failed(e);
        }

        loop {
            tokio::select! {
                biased;

                _ = &mut stop => return LoopExit::Stopped,

                event = events.recv() => match event {
                    None => {
                        return LoopExit::Failed(Error::Watch {
                            path: path.to_path_buf(),
                            source: notify::Error::generic("event stream ended"),
                        });
                    }
                    Some(Ok(event)) if touches(&event, path) => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        log::warn!("watcher: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

fn touches(event: &Event, path: &Path) -> bool {
    let name = path.file_name();
    event.paths.iter().any(|p| p.file_name() == name)
}

/// Make the file hold `desired`, recreating it when missing
///
/// Returns whether anything had to be written.
async fn reconcile(path: &Path, desired: &[u8]) -> Result<bool> {
    match fs::read(path).await {
        Ok(current) if current == desired => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(DEFAULT_MODE)
                .open(path)
                .await
            {
                Ok(_) => log::info!("Recreated missing {}", path.display()),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(Error::io("create", path, e)),
            }
        }
        Err(e) => return Err(Error::io("read", path, e)),
    }

    fs::write(path, desired)
        .await
        .map_err(|e| Error::io("write", path, e))?;
    log::info!("Reasserted DNS configuration in {}", path.display());
    Ok(true)
}

/// Write through a sibling temp file and rename it over `path`
async fn write_atomic(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(format!(".vpnlink-tmp-{}", std::process::id()));
    let tmp = PathBuf::from(tmp);

    let result = async {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&tmp)
            .await
            .map_err(|e| Error::io("create", &tmp, e))?;
        file.write_all(content)
            .await
            .map_err(|e| Error::io("write", &tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::io("sync", &tmp, e))?;
        drop(file);

        // the open mode is subject to the umask
        fs::set_permissions(&tmp, Permissions::from_mode(mode))
            .await
            .map_err(|e| Error::io("chmod", &tmp, e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::io("write", path, e))
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp).await;
    }
    result
}
