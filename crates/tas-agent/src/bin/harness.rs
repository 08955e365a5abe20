//! A stub test controller, standing in for the real controller process
//! during development and in integration tests: connects to a UNIX socket,
//! performs the `HELLO` handshake, hands the agent an initial
//! `SharedConfig`, then drives a fixed number of frame boundaries before
//! sending `QUIT`.
//!
//! Grounded on `scx_gamer::main`'s `Opts` (clap-derived, `#[command(...)]`
//! header, one flag per tunable) for the CLI shape.

use std::os::unix::net::UnixStream;

use clap::Parser;
use tas_control::{ControlLink, Version};
use tas_protocol::{Frame, SharedConfig, Tag};

#[derive(Debug, Clone, clap::Parser)]
#[command(
    name = "tas-agent-harness",
    version,
    disable_version_flag = true,
    about = "Stub test controller for driving a tas-agent instance over its control socket."
)]
struct Opts {
    /// Path to the UNIX-domain control socket to connect to.
    #[clap(long)]
    socket: String,

    /// Number of frame boundaries to drive before sending QUIT.
    #[clap(short = 'n', long, default_value = "60")]
    frames: u32,

    /// Increase log verbosity (repeatable).
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    tas_agent::init_logging(opts.verbose)?;

    let stream = UnixStream::connect(&opts.socket)?;
    let mut link = ControlLink::new(stream);
    link.handshake_as_controller(Version::CURRENT)?;
    log::info!("handshake complete, driving {} frame boundaries", opts.frames);

    link.send(Frame::new(Tag::ConfigUpdate, tas_agent::messages::shared_config_to_bytes(&SharedConfig::default())))?;

    for frame_index in 0..opts.frames {
        let begin = link.recv()?;
        if begin.tag != Tag::FrameBegin {
            anyhow::bail!("expected FRAME_BEGIN, got {:?}", begin.tag);
        }
        log::debug!("frame {frame_index}: agent entered frame boundary");
        link.send(Frame::empty(Tag::FrameEnd))?;
    }

    link.send(Frame::empty(Tag::Quit))?;
    Ok(())
}
