//! Operations applied to a phase container around its run
//!
//! Most operations prepare a created container before it starts. Copy-out
//! operations read results back once it has exited successfully.
//! Operations run in the order they were attached, on the calling task.
//! Archive construction is blocking filesystem work and runs on the
//! blocking pool. Windows copies are staged as layer archives in a helper
//! container that mounts the destination volume.

use crate::archive::{self, ArchiveOptions, FileFilter, TarFlavor, TarTarget};
use crate::build::mount_paths::ContainerOs;
use crate::docker::{ContainerConfig, DockerClient, HostConfig, Isolation, MountPoint};
use crate::error::{OperationKind, PackError, PackResult};
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Where Windows helper containers receive archives before the copy
const WINDOWS_STAGING_DIR: &str = "c:\\windows-dir-copy";
const WINDOWS_ADMIN: &str = "ContainerAdministrator";

/// One step of a phase's pre-start operation stream
#[derive(Clone)]
pub enum ContainerOperation {
    /// Copy a directory or zip file to `dst`, owned by `uid:gid`
    CopyDir {
        src: PathBuf,
        dst: String,
        uid: u32,
        gid: u32,
        os: ContainerOs,
        filter: Option<FileFilter>,
    },
    /// Hand the roots of `volumes` to `uid:gid`
    EnsureVolumeAccess {
        uid: u32,
        gid: u32,
        os: ContainerOs,
        volumes: Vec<String>,
    },
    /// Place a single file at `path`
    WriteFile {
        path: String,
        contents: Vec<u8>,
        mode: u32,
        os: ContainerOs,
    },
    /// Extract `src` from an exited container into the host directory `dst`
    CopyOutTo { src: String, dst: PathBuf },
}

impl ContainerOperation {
    pub fn copy_dir(
        src: impl Into<PathBuf>,
        dst: impl Into<String>,
        uid: u32,
        gid: u32,
        os: ContainerOs,
        filter: Option<FileFilter>,
    ) -> Self {
        Self::CopyDir {
            src: src.into(),
            dst: dst.into(),
            uid,
            gid,
            os,
            filter,
        }
    }

    pub fn ensure_volume_access(uid: u32, gid: u32, os: ContainerOs, volumes: &[&str]) -> Self {
        Self::EnsureVolumeAccess {
            uid,
            gid,
            os,
            volumes: volumes.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn write_file(path: impl Into<String>, contents: Vec<u8>, mode: u32, os: ContainerOs) -> Self {
        Self::WriteFile {
            path: path.into(),
            contents,
            mode,
            os,
        }
    }

    pub fn copy_out_to(src: impl Into<String>, dst: impl Into<PathBuf>) -> Self {
        Self::CopyOutTo {
            src: src.into(),
            dst: dst.into(),
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CopyDir { .. } => OperationKind::CopyIn,
            Self::EnsureVolumeAccess { .. } => OperationKind::EnsureAccess,
            Self::WriteFile { .. } => OperationKind::WriteFile,
            Self::CopyOutTo { .. } => OperationKind::CopyOut,
        }
    }

    /// Apply to the created, not yet started container `container_id`
    pub async fn apply(&self, docker: &dyn DockerClient, container_id: &str) -> PackResult<()> {
        let kind = self.kind();
        self.run(docker, container_id).await.map_err(|e| match e {
            PackError::Operation { .. } => e,
            other => PackError::operation(kind, other),
        })
    }

    async fn run(&self, docker: &dyn DockerClient, container_id: &str) -> PackResult<()> {
        match self {
            Self::CopyDir {
                src,
                dst,
                uid,
                gid,
                os,
                filter,
            } => {
                let staged = if os.is_windows() { WINDOWS_STAGING_DIR } else { dst.as_str() };
                let target = TarTarget::for_destination(staged, os.tar_flavor());
                let options = ArchiveOptions::new(*uid, *gid).with_filter(filter.clone());
                let src = src.clone();
                let blocking_target = target.clone();
                let bytes = tokio::task::spawn_blocking(move || {
                    archive::tar_from_path(&src, &blocking_target, &options)
                })
                .await
                .map_err(|e| PackError::Internal(format!("archive task failed: {}", e)))??;

                debug!("Copying {} bytes to {}", bytes.len(), dst);
                if os.is_windows() {
                    copy_in_windows(docker, container_id, bytes, dst, OperationKind::CopyIn).await
                } else {
                    docker
                        .copy_to_container(container_id, &target.copy_root, Box::pin(Cursor::new(bytes)))
                        .await
                }
            }
            Self::EnsureVolumeAccess {
                uid,
                gid,
                os,
                volumes,
            } => {
                if os.is_windows() || volumes.is_empty() {
                    Ok(())
                } else {
                    ensure_volume_access(docker, container_id, *uid, *gid, volumes).await
                }
            }
            Self::WriteFile {
                path,
                contents,
                mode,
                os,
            } if os.is_windows() => {
                let (dir, file) = match path.rsplit_once(['\\', '/']) {
                    Some((dir, file)) if dir.ends_with(':') => (format!("{}\\", dir), file),
                    Some((dir, file)) => (dir.to_string(), file),
                    None => {
                        return Err(PackError::operation(
                            OperationKind::WriteFile,
                            format!("{} is not an absolute container path", path),
                        ))
                    }
                };
                let staged = format!("{}\\{}", WINDOWS_STAGING_DIR, file);
                let (_, bytes) = archive::single_file_tar(&staged, contents, *mode, TarFlavor::Windows)?;
                copy_in_windows(docker, container_id, bytes, &dir, OperationKind::WriteFile).await
            }
            Self::WriteFile {
                path,
                contents,
                mode,
                os,
            } => {
                let (target, bytes) =
                    archive::single_file_tar(path, contents, *mode, os.tar_flavor())?;
                docker
                    .copy_to_container(container_id, &target.copy_root, Box::pin(Cursor::new(bytes)))
                    .await
            }
            Self::CopyOutTo { src, dst } => {
                let bytes = copy_out(docker, container_id, src).await?;
                debug!("Extracting {} bytes from {} to {}", bytes.len(), src, dst.display());
                let dst = dst.clone();
                tokio::task::spawn_blocking(move || unpack_to(&bytes, &dst))
                    .await
                    .map_err(|e| PackError::Internal(format!("unpack task failed: {}", e)))?
            }
        }
    }
}

impl fmt::Debug for ContainerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CopyDir {
                src,
                dst,
                uid,
                gid,
                os,
                filter,
            } => f
                .debug_struct("CopyDir")
                .field("src", src)
                .field("dst", dst)
                .field("uid", uid)
                .field("gid", gid)
                .field("os", os)
                .field("filtered", &filter.is_some())
                .finish(),
            Self::EnsureVolumeAccess {
                uid,
                gid,
                os,
                volumes,
            } => f
                .debug_struct("EnsureVolumeAccess")
                .field("uid", uid)
                .field("gid", gid)
                .field("os", os)
                .field("volumes", volumes)
                .finish(),
            Self::WriteFile {
                path, mode, os, contents,
            } => f
                .debug_struct("WriteFile")
                .field("path", path)
                .field("mode", &format_args!("{:o}", mode))
                .field("os", os)
                .field("len", &contents.len())
                .finish(),
            Self::CopyOutTo { src, dst } => f
                .debug_struct("CopyOutTo")
                .field("src", src)
                .field("dst", dst)
                .finish(),
        }
    }
}

/// Chown volume roots from a short-lived root container built from the
/// phase container's image
async fn ensure_volume_access(
    docker: &dyn DockerClient,
    container_id: &str,
    uid: u32,
    gid: u32,
    volumes: &[String],
) -> PackResult<()> {
    let info = docker.container_inspect(container_id).await?;

    let mut binds = Vec::with_capacity(volumes.len());
    let mut commands = Vec::with_capacity(volumes.len());
    for (i, volume) in volumes.iter().enumerate() {
        let mount = format!("/tmp/volume-{}", i);
        binds.push(format!("{}:{}", volume, mount));
        commands.push(format!("chown -R {}:{} {}", uid, gid, mount));
    }

    let config = ContainerConfig {
        image: info.image,
        cmd: vec!["sh".to_string(), "-c".to_string(), commands.join(" && ")],
        entrypoint: Some(Vec::new()),
        user: "root".to_string(),
        ..Default::default()
    };
    let host = HostConfig {
        binds,
        ..Default::default()
    };

    let helper = docker.container_create(&config, &host, None).await?;
    let outcome = run_helper(docker, &helper).await;
    let removed = docker.container_remove(&helper, true).await;

    match outcome? {
        0 => removed,
        code => Err(PackError::operation(
            OperationKind::EnsureAccess,
            format!("chown exited with status code: {}", code),
        )),
    }
}

/// Stage a Windows layer archive in a helper container that shares the
/// volume mounted at `dst`, then `xcopy` it into place and grant users access
async fn copy_in_windows(
    docker: &dyn DockerClient,
    container_id: &str,
    archive: Vec<u8>,
    dst: &str,
    kind: OperationKind,
) -> PackResult<()> {
    let info = docker.container_inspect(container_id).await?;
    let mount = find_mount(&info.mounts, dst)
        .ok_or_else(|| PackError::operation(kind, format!("no volume is mounted at {}", dst)))?;
    let source = if mount.name.is_empty() {
        &mount.source
    } else {
        &mount.name
    };

    let config = ContainerConfig {
        image: info.image.clone(),
        cmd: vec![
            "cmd".to_string(),
            "/c".to_string(),
            format!(
                "xcopy {staged} {dst} /E /H /Y /C /B && icacls {dst} /Q /T /grant *S-1-5-32-545:(OI)(CI)F",
                staged = WINDOWS_STAGING_DIR,
                dst = dst
            ),
        ],
        entrypoint: Some(Vec::new()),
        user: WINDOWS_ADMIN.to_string(),
        ..Default::default()
    };
    let host = HostConfig {
        binds: vec![format!("{}:{}", source, mount.destination)],
        isolation: Isolation::Process,
        ..Default::default()
    };

    let helper = docker.container_create(&config, &host, None).await?;
    let outcome: PackResult<i64> = async {
        docker
            .copy_to_container(&helper, "c:\\", Box::pin(Cursor::new(archive)))
            .await?;
        run_helper(docker, &helper).await
    }
    .await;
    let removed = docker.container_remove(&helper, true).await;

    match outcome? {
        0 => removed,
        code => Err(PackError::operation(
            kind,
            format!("xcopy exited with status code: {}", code),
        )),
    }
}

/// Mount at `dst`, or the deepest mount containing it
fn find_mount<'a>(mounts: &'a [MountPoint], dst: &str) -> Option<&'a MountPoint> {
    let normalize = |path: &str| path.replace('/', "\\").trim_end_matches('\\').to_lowercase();
    let dst = normalize(dst);
    mounts
        .iter()
        .filter(|m| {
            let destination = normalize(&m.destination);
            dst == destination || dst.starts_with(&format!("{}\\", destination))
        })
        .max_by_key(|m| m.destination.len())
}

async fn run_helper(docker: &dyn DockerClient, id: &str) -> PackResult<i64> {
    docker.container_start(id).await?;
    docker.container_wait(id).await
}

/// Read `path` out of a container as a tar archive
pub async fn copy_out(
    docker: &dyn DockerClient,
    container_id: &str,
    path: &str,
) -> PackResult<Vec<u8>> {
    let mut stream = docker.copy_from_container(container_id, path).await?;
    let mut bytes = Vec::new();
    stream
        .read_to_end(&mut bytes)
        .await
        .map_err(|e| PackError::io(format!("reading {} from container", path), e))?;
    Ok(bytes)
}

/// Unpack a copied-out archive under `dst`, creating it first
fn unpack_to(bytes: &[u8], dst: &Path) -> PackResult<()> {
    std::fs::create_dir_all(dst)
        .map_err(|e| PackError::io(format!("creating {}", dst.display()), e))?;
    tar::Archive::new(bytes)
        .unpack(dst)
        .map_err(|e| PackError::archive(format!("extracting into {}", dst.display()), e))
}

/// Apply `ops` in order, stopping at the first failure
pub async fn apply_all(
    ops: &[ContainerOperation],
    docker: &dyn DockerClient,
    container_id: &str,
) -> PackResult<()> {
    for op in ops {
        op.apply(docker, container_id).await?;
    }
    Ok(())
}
