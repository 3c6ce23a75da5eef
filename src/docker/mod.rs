//! Docker runtime access
//!
//! - `DockerClient`: the runtime method set the lifecycle core depends on
//! - `DockerCli`: implementation driving the docker CLI

mod cli;
mod client;
pub mod types;

pub use cli::DockerCli;
pub use client::DockerClient;
pub use types::{
    AttachedStreams, ContainerConfig, ContainerInfo, ContainerState, HostConfig, ImageInfo,
    Isolation, MountPoint, TarStream,
};

use crate::logging::LineWriter;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Forward every line of `reader` to `writer` until EOF.
///
/// Returns the number of lines forwarded. Read errors end the stream.
pub(crate) async fn forward_lines<R>(reader: R, writer: LineWriter) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut count = 0;

    while let Ok(Some(line)) = lines.next_line().await {
        writer(&line);
        count += 1;
    }

    count
}
