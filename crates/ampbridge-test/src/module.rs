//! Scripted fake of the embedded computation unit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ampbridge::call::Completion;
use ampbridge::memory::{BufferRole, ViewSource};
use ampbridge::module::TransformModule;

use crate::memory::FakeMemory;

/// What the fake module does when invoked.
#[derive(Debug, Clone)]
pub enum ModuleBehavior {
    /// Write the html input back out unchanged.
    Echo,
    /// Write a fixed answer regardless of input.
    Fixed(String),
    /// Grow (relocate) the linear memory mid-call, then echo. Exercises
    /// stale-view recovery on the output read.
    GrowThenEcho,
    /// Signal abnormal completion with the given reason.
    Fail(String),
    /// Never signal completion, like a wedged module. Exercises the
    /// deadline path.
    Never,
    /// Forge an impossible length prefix in the output buffer, then
    /// signal completion. Exercises corruption detection.
    CorruptOutput,
}

/// In-process stand-in for the module: reads the input segments, runs the
/// scripted behavior, writes the output segment and consumes the
/// completion — mirroring the real callback protocol.
#[derive(Debug)]
pub struct FakeModule {
    memory: Arc<FakeMemory>,
    behavior: ModuleBehavior,
    invocations: AtomicU64,
}

impl FakeModule {
    /// Wrap `memory` with the given scripted behavior.
    #[must_use]
    pub fn new(memory: Arc<FakeMemory>, behavior: ModuleBehavior) -> Self {
        Self {
            memory,
            behavior,
            invocations: AtomicU64::new(0),
        }
    }

    /// The fake linear memory backing this module.
    #[must_use]
    pub fn memory(&self) -> Arc<FakeMemory> {
        Arc::clone(&self.memory)
    }

    /// How many times a transform was started.
    #[must_use]
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl TransformModule for FakeModule {
    fn buffer_source(&self, role: BufferRole) -> Arc<dyn ViewSource> {
        self.memory.source(role)
    }

    fn begin_transform(&self, completion: Completion) {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let memory = Arc::clone(&self.memory);
        let behavior = self.behavior.clone();
        tokio::spawn(run(memory, behavior, completion));
    }
}

async fn run(memory: Arc<FakeMemory>, behavior: ModuleBehavior, completion: Completion) {
    match behavior {
        ModuleBehavior::Echo => echo(&memory, completion),
        ModuleBehavior::Fixed(answer) => {
            match memory.write_frame(BufferRole::HtmlOut, &answer) {
                Ok(()) => completion.done(),
                Err(e) => completion.fail(format!("writing output: {e}")),
            }
        }
        ModuleBehavior::GrowThenEcho => {
            memory.grow();
            echo(&memory, completion);
        }
        ModuleBehavior::Fail(reason) => completion.fail(reason),
        ModuleBehavior::Never => {
            // Hold the completion open forever so the receiver never
            // observes a drop.
            let _keep = completion;
            std::future::pending::<()>().await;
        }
        ModuleBehavior::CorruptOutput => {
            memory.write_raw_prefix(BufferRole::HtmlOut, u32::MAX);
            completion.done();
        }
    }
}

fn echo(memory: &FakeMemory, completion: Completion) {
    let url = memory.read_frame(BufferRole::UrlIn);
    let html = memory.read_frame(BufferRole::HtmlIn);
    match (url, html) {
        (Ok(_), Ok(html)) => match memory.write_frame(BufferRole::HtmlOut, &html) {
            Ok(()) => completion.done(),
            Err(e) => completion.fail(format!("writing output: {e}")),
        },
        (Err(e), _) => completion.fail(format!("decoding url: {e}")),
        (_, Err(e)) => completion.fail(format!("decoding html: {e}")),
    }
}
