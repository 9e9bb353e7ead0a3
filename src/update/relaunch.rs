//! Replacing the running executable
//!
//! A process cannot always overwrite its own image: Windows refuses to
//! delete or overwrite a running `.exe`. There the swap is handed to a
//! detached helper script that waits for this process to exit. Platforms
//! with unlink semantics can rename the new build over the old path directly.
//!
//! Both mechanisms honour the same contract: stop any remaining instance,
//! install the staged payload, start the new build with `--post-update`,
//! and leave no helper artifacts behind.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::config::{APP_STAGING_DIR, POST_UPDATE_ARG, RELAUNCH_WAIT_SECS, RelaunchStrategy};
use crate::update::component::mark_executable;
use crate::update::error::UpdateError;

/// What has been staged for installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedPayload {
    /// An extracted archive whose `source_dir` is merged over the app directory
    Tree {
        source_dir: PathBuf,
        extract_dir: PathBuf,
        download_temp: PathBuf,
    },
    /// A single executable staged next to the current one
    Binary { staged: PathBuf },
}

/// Everything a mechanism needs to finish a self-update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaunchPlan {
    pub app_path: PathBuf,
    pub app_dir: PathBuf,
    /// Process name used to force-terminate lingering instances
    pub process_name: String,
    pub payload: StagedPayload,
}

/// Helper process ready to be launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRelaunch {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Script written to disk, removed again if launching fails
    pub script: Option<PathBuf>,
}

pub trait RelaunchMechanism: Send + Sync {
    /// Write whatever the helper needs and describe how to start it
    fn prepare(&self, plan: &RelaunchPlan) -> Result<PreparedRelaunch, UpdateError>;

    /// Start the helper without waiting for it
    fn launch(&self, plan: &RelaunchPlan, prepared: &PreparedRelaunch) -> Result<(), UpdateError>;
}

/// Pick the mechanism for a configured strategy on the current platform
pub fn mechanism_for(strategy: RelaunchStrategy) -> Box<dyn RelaunchMechanism> {
    match strategy {
        RelaunchStrategy::Auto if cfg!(windows) => Box::new(ScriptRelaunch::new(ScriptFlavor::Batch)),
        RelaunchStrategy::Auto | RelaunchStrategy::Rename => Box::new(RenameRelaunch),
        RelaunchStrategy::Script => Box::new(ScriptRelaunch::native()),
    }
}

// =============================================================================
// Script helper
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFlavor {
    /// `update.bat` run through `cmd /c`
    Batch,
    /// `update.sh` run through `/bin/sh`
    Shell,
}

impl ScriptFlavor {
    pub fn file_name(&self) -> &'static str {
        match self {
            ScriptFlavor::Batch => "update.bat",
            ScriptFlavor::Shell => "update.sh",
        }
    }
}

/// Generates a native shell script that performs the swap after exit
#[derive(Debug, Clone, Copy)]
pub struct ScriptRelaunch {
    flavor: ScriptFlavor,
}

impl ScriptRelaunch {
    pub fn new(flavor: ScriptFlavor) -> Self {
        Self { flavor }
    }

    /// The flavor understood by this platform's shell
    pub fn native() -> Self {
        if cfg!(windows) {
            Self::new(ScriptFlavor::Batch)
        } else {
            Self::new(ScriptFlavor::Shell)
        }
    }

    pub fn script_path(&self, plan: &RelaunchPlan) -> PathBuf {
        plan.app_dir.join(self.flavor.file_name())
    }

    pub fn render(&self, plan: &RelaunchPlan) -> String {
        match self.flavor {
            ScriptFlavor::Batch => render_batch(plan),
            ScriptFlavor::Shell => render_shell(plan),
        }
    }
}

impl RelaunchMechanism for ScriptRelaunch {
    fn prepare(&self, plan: &RelaunchPlan) -> Result<PreparedRelaunch, UpdateError> {
        let script = self.script_path(plan);
        std::fs::write(&script, self.render(plan))?;
        debug!("Wrote relaunch script {:?}", script);

        let (program, args) = match self.flavor {
            ScriptFlavor::Batch => (
                PathBuf::from("cmd"),
                vec!["/c".to_string(), script.display().to_string()],
            ),
            ScriptFlavor::Shell => {
                mark_executable(&script)?;
                (PathBuf::from("/bin/sh"), vec![script.display().to_string()])
            }
        };

        Ok(PreparedRelaunch {
            program,
            args,
            working_dir: plan.app_dir.clone(),
            script: Some(script),
        })
    }

    fn launch(&self, _plan: &RelaunchPlan, prepared: &PreparedRelaunch) -> Result<(), UpdateError> {
        info!("Starting relaunch helper {:?}", prepared.script);
        spawn_detached(&prepared.program, &prepared.args, &prepared.working_dir)
    }
}

fn render_batch(plan: &RelaunchPlan) -> String {
    let app = plan.app_path.display();
    let app_dir = plan.app_dir.display();
    let name = &plan.process_name;

    let mut script = format!(
        "@echo off\r\n\
         chcp 65001 >nul\r\n\
         echo Updating {name}... please wait\r\n\
         \r\n\
         :: Wait for the application to close\r\n\
         timeout /t {RELAUNCH_WAIT_SECS} /nobreak >nul\r\n\
         taskkill /f /im \"{name}\" 2>nul\r\n\
         timeout /t 1 /nobreak >nul\r\n\
         \r\n"
    );

    match &plan.payload {
        StagedPayload::Tree {
            source_dir,
            extract_dir,
            download_temp,
        } => {
            let source = source_dir.display();
            script.push_str(&format!(
                ":: Merge new files into the install directory\r\n\
                 robocopy \"{source}\" \"{app_dir}\" /E /NFL /NDL /NJH /NJS /nc /ns /np 2>nul\r\n\
                 if errorlevel 8 (\r\n\
                 \x20   xcopy /s /e /y /q \"{source}\\*\" \"{app_dir}\\\" 2>nul\r\n\
                 )\r\n\
                 rmdir /s /q \"{extract}\" 2>nul\r\n\
                 del /f /q \"{download}\" 2>nul\r\n\
                 \r\n",
                extract = extract_dir.display(),
                download = download_temp.display(),
            ));
        }
        StagedPayload::Binary { staged } => {
            script.push_str(&format!(
                ":: Replace the executable\r\n\
                 del /f /q \"{app}\" 2>nul\r\n\
                 if exist \"{app}\" (\r\n\
                 \x20   taskkill /f /im \"{name}\" 2>nul\r\n\
                 \x20   timeout /t 2 /nobreak >nul\r\n\
                 \x20   del /f /q \"{app}\" 2>nul\r\n\
                 )\r\n\
                 move /y \"{staged}\" \"{app}\"\r\n\
                 \r\n",
                staged = staged.display(),
            ));
        }
    }

    script.push_str(&format!(
        "if exist \"{app}\" (\r\n\
         \x20   echo Update installed, restarting...\r\n\
         \x20   start \"\" \"{app}\" {POST_UPDATE_ARG}\r\n\
         ) else (\r\n\
         \x20   echo Update failed: {app} is missing\r\n\
         \x20   pause\r\n\
         )\r\n\
         \r\n\
         (goto) 2>nul & del \"%~f0\"\r\n"
    ));

    script
}

/// Quote a path for POSIX sh
fn sh_quote(value: &Path) -> String {
    sh_quote_str(&value.display().to_string())
}

fn sh_quote_str(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `pkill -f` pattern matching a command line that starts with `app_path`.
///
/// `pkill -x` compares against the kernel's process name, which Linux cuts
/// to 15 characters, so longer executable names never match.
fn pkill_pattern(app_path: &Path) -> String {
    let mut pattern = String::from("^");
    for c in app_path.display().to_string().chars() {
        if "\\.[]()*+?{}|^$".contains(c) {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push_str("( |$)");
    sh_quote_str(&pattern)
}

fn render_shell(plan: &RelaunchPlan) -> String {
    let app = sh_quote(&plan.app_path);
    let app_dir = sh_quote(&plan.app_dir);
    let pattern = pkill_pattern(&plan.app_path);

    let mut script = format!(
        "#!/bin/sh\n\
         # Finishes the update of {process} once it has exited\n\
         sleep {RELAUNCH_WAIT_SECS}\n\
         pkill -f {pattern} 2>/dev/null\n\
         sleep 1\n\
         \n",
        process = plan.process_name,
    );

    match &plan.payload {
        StagedPayload::Tree {
            source_dir,
            extract_dir,
            download_temp,
        } => {
            let source = sh_quote(&source_dir.join("."));
            script.push_str(&format!(
                "cp -Rf {source} {app_dir}/\n\
                 rm -rf {extract}\n\
                 rm -f {download}\n\
                 \n",
                extract = sh_quote(extract_dir),
                download = sh_quote(download_temp),
            ));
        }
        StagedPayload::Binary { staged } => {
            script.push_str(&format!(
                "rm -f {app}\n\
                 if [ -e {app} ]; then\n\
                 \x20   pkill -9 -f {pattern} 2>/dev/null\n\
                 \x20   sleep 2\n\
                 \x20   rm -f {app}\n\
                 fi\n\
                 mv -f {staged} {app}\n\
                 chmod +x {app}\n\
                 \n",
                staged = sh_quote(staged),
            ));
        }
    }

    script.push_str(&format!(
        "if [ -e {app} ]; then\n\
         \x20   nohup {app} {POST_UPDATE_ARG} >/dev/null 2>&1 &\n\
         else\n\
         \x20   echo \"Update failed: {app} is missing\" >&2\n\
         fi\n\
         \n\
         rm -f \"$0\"\n"
    ));

    script
}

// =============================================================================
// Direct rename
// =============================================================================

/// Installs the payload immediately and spawns the new build.
///
/// Only valid where a running executable may be unlinked or replaced. When
/// the new build cannot be started the previous install is put back.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenameRelaunch;

impl RenameRelaunch {
    /// Put the staged payload in place.
    ///
    /// Replaced files are kept aside until the returned transaction is
    /// committed or rolled back.
    pub fn apply(&self, plan: &RelaunchPlan) -> Result<InstallTransaction, UpdateError> {
        let transaction = match &plan.payload {
            StagedPayload::Binary { staged } => {
                mark_executable(staged)?;
                let mut transaction = InstallTransaction::default();
                if let Err(e) = transaction.place(staged, &plan.app_path) {
                    transaction.rollback();
                    return Err(e);
                }
                transaction
            }
            StagedPayload::Tree { source_dir, .. } => merge_tree(source_dir, &plan.app_dir)?,
        };
        info!("Installed new build at {:?}", plan.app_path);
        Ok(transaction)
    }
}

impl RelaunchMechanism for RenameRelaunch {
    fn prepare(&self, plan: &RelaunchPlan) -> Result<PreparedRelaunch, UpdateError> {
        Ok(PreparedRelaunch {
            program: plan.app_path.clone(),
            args: vec![POST_UPDATE_ARG.to_string()],
            working_dir: plan.app_dir.clone(),
            script: None,
        })
    }

    fn launch(&self, plan: &RelaunchPlan, prepared: &PreparedRelaunch) -> Result<(), UpdateError> {
        let transaction = self.apply(plan)?;

        if let Err(e) = spawn_detached(&prepared.program, &prepared.args, &prepared.working_dir) {
            warn!("New build did not start, restoring the previous install: {}", e);
            transaction.rollback();
            return Err(e);
        }

        transaction.commit();
        if let StagedPayload::Tree {
            extract_dir,
            download_temp,
            ..
        } = &plan.payload
        {
            let _ = std::fs::remove_dir_all(extract_dir);
            let _ = std::fs::remove_file(download_temp);
        }
        Ok(())
    }
}

/// Files moved into place by a direct install, revertible until committed
#[derive(Debug, Default)]
#[must_use = "an install must be committed or rolled back"]
pub struct InstallTransaction {
    /// `(staged, target)` pairs in install order
    placed: Vec<(PathBuf, PathBuf)>,
    /// `(original, backup)` pairs for every replaced file
    set_aside: Vec<(PathBuf, PathBuf)>,
    created_dirs: Vec<PathBuf>,
    staging_dir: Option<PathBuf>,
}

impl InstallTransaction {
    fn place(&mut self, staged: &Path, target: &Path) -> Result<(), UpdateError> {
        if std::fs::symlink_metadata(target).is_ok() {
            let backup = with_suffix(target, ".old");
            std::fs::rename(target, &backup)?;
            self.set_aside.push((target.to_path_buf(), backup));
        }
        std::fs::rename(staged, target)?;
        self.placed.push((staged.to_path_buf(), target.to_path_buf()));
        Ok(())
    }

    fn create_dir(&mut self, dir: &Path) -> Result<(), UpdateError> {
        if !dir.is_dir() {
            std::fs::create_dir(dir)?;
            self.created_dirs.push(dir.to_path_buf());
        }
        Ok(())
    }

    /// Number of files installed so far
    pub fn installed_files(&self) -> usize {
        self.placed.len()
    }

    /// Keep the new files and drop the replaced originals
    pub fn commit(mut self) {
        for (_, backup) in &self.set_aside {
            // A still-running image cannot be removed on every platform
            if let Err(e) = std::fs::remove_file(backup) {
                debug!("Could not remove {:?}: {}", backup, e);
            }
        }
        self.remove_staging();
    }

    /// Restore every replaced file and remove what the install added
    pub fn rollback(mut self) {
        for (staged, target) in self.placed.iter().rev() {
            if std::fs::rename(target, staged).is_err() {
                let _ = std::fs::remove_file(target);
            }
        }
        for (original, backup) in self.set_aside.iter().rev() {
            if let Err(e) = std::fs::rename(backup, original) {
                warn!("Could not restore {:?} from {:?}: {}", original, backup, e);
            }
        }
        for dir in self.created_dirs.iter().rev() {
            let _ = std::fs::remove_dir(dir);
        }
        self.remove_staging();
        info!("Rolled back {} installed file(s)", self.placed.len());
    }

    fn remove_staging(&mut self) {
        if let Some(staging_dir) = self.staging_dir.take() {
            let _ = std::fs::remove_dir_all(staging_dir);
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[derive(Debug)]
struct TreeEntry {
    /// Path relative to the tree root
    path: PathBuf,
    is_dir: bool,
}

/// Every entry under `root`, parents before their children
fn tree_entries(root: &Path) -> Result<Vec<TreeEntry>, UpdateError> {
    let mut entries = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(relative) = pending.pop() {
        let mut children = std::fs::read_dir(root.join(&relative))?
            .collect::<Result<Vec<_>, _>>()?;
        children.sort_by_key(|child| child.file_name());

        for child in children {
            let path = relative.join(child.file_name());
            let is_dir = child.file_type()?.is_dir();
            if is_dir {
                pending.push(path.clone());
            }
            entries.push(TreeEntry { path, is_dir });
        }
    }

    Ok(entries)
}

/// Merge every file under `source` into `dest`.
///
/// The tree is first copied into a staging directory inside `dest`. Each
/// staged file is then renamed over its target with the original moved
/// aside as `.old`, so a file mapped by a running process is never written
/// in place. A failure at any point leaves `dest` as it was.
pub fn merge_tree(source: &Path, dest: &Path) -> Result<InstallTransaction, UpdateError> {
    let entries = tree_entries(source)?;

    // A file where a directory is expected (or the reverse) cannot be
    // swapped by rename
    for entry in &entries {
        let target = dest.join(&entry.path);
        let conflict = match std::fs::symlink_metadata(&target) {
            Err(_) => false,
            Ok(_) if entry.is_dir => !target.is_dir(),
            Ok(metadata) => metadata.is_dir(),
        };
        if conflict {
            warn!("Cannot merge {:?}: destination has the wrong type", target);
            return Err(UpdateError::InvalidPath(target));
        }
    }

    let staging_dir = dest.join(APP_STAGING_DIR);
    if staging_dir.exists() {
        std::fs::remove_dir_all(&staging_dir)?;
    }
    std::fs::create_dir_all(&staging_dir)?;

    let mut transaction = InstallTransaction {
        staging_dir: Some(staging_dir.clone()),
        ..Default::default()
    };

    let result = stage_entries(source, &staging_dir, &entries)
        .and_then(|()| install_entries(&mut transaction, &staging_dir, dest, &entries));

    match result {
        Ok(()) => {
            debug!("Merged {} file(s) into {:?}", transaction.installed_files(), dest);
            Ok(transaction)
        }
        Err(e) => {
            transaction.rollback();
            Err(e)
        }
    }
}

fn stage_entries(source: &Path, staging_dir: &Path, entries: &[TreeEntry]) -> Result<(), UpdateError> {
    for entry in entries {
        let staged = staging_dir.join(&entry.path);
        if entry.is_dir {
            std::fs::create_dir_all(&staged)?;
        } else {
            std::fs::copy(source.join(&entry.path), &staged)?;
        }
    }
    Ok(())
}

fn install_entries(
    transaction: &mut InstallTransaction,
    staging_dir: &Path,
    dest: &Path,
    entries: &[TreeEntry],
) -> Result<(), UpdateError> {
    for entry in entries {
        let target = dest.join(&entry.path);
        if entry.is_dir {
            transaction.create_dir(&target)?;
        } else {
            transaction.place(&staging_dir.join(&entry.path), &target)?;
        }
    }
    Ok(())
}

fn spawn_detached(program: &Path, args: &[String], working_dir: &Path) -> Result<(), UpdateError> {
    let mut command = Command::new(program);
    command.args(args).current_dir(working_dir);

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;
        command.creation_flags(CREATE_NEW_CONSOLE);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        use std::process::Stdio;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);
    }

    command
        .spawn()
        .map(|child| debug!("Spawned detached {:?} (pid {})", program, child.id()))
        .map_err(|e| UpdateError::Relaunch(format!("{:?}: {}", program, e)))
}
