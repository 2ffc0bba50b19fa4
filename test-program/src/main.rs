use frameguess::arch::{capture_context, Arch, Host};
use frameguess::code::{BlobKind, CodeBlob, CodeMap};
use frameguess::mem::{Memory, StackImage};
use frameguess::process::ProcessMemory;
use frameguess::regs::{Context, RegisterSnapshot};
use frameguess::stack::StackVm;
use frameguess::vm::{Frame, JavaThread, Vm};
use frameguess::{walk, Addr, FrameGuess, FrameGuesser};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const INTERPRETER: (u64, u64) = (0x10_0000, 0x10_8000);
const COMPILED: (u64, u64) = (0x20_0000, 0x20_4000);
const CALL_STUB: (u64, u64) = (0x30_0000, 0x30_0100);
const FRAME_SIZE: u64 = 0x40;

struct DemoThread {
    last_java: Option<(Addr, Option<Addr>, Option<Addr>)>,
    context: Context,
}

impl JavaThread for DemoThread {
    fn last_java_sp(&self) -> Option<Addr> {
        self.last_java.map(|(sp, _, _)| sp)
    }

    fn last_java_fp(&self) -> Option<Addr> {
        self.last_java.and_then(|(_, fp, _)| fp)
    }

    fn last_java_pc(&self) -> Option<Addr> {
        self.last_java.and_then(|(_, _, pc)| pc)
    }

    fn register_context(&self) -> frameguess::Result<Context> {
        Ok(self.context.clone())
    }
}

fn addr(value: u64) -> Addr {
    Addr::new(value).expect("demo addresses are never null")
}

fn code_map() -> CodeMap {
    let mut map = CodeMap::new().with_interpreter(addr(INTERPRETER.0)..addr(INTERPRETER.1));
    for (range, kind, frame_size) in [
        (COMPILED, BlobKind::Compiled, FRAME_SIZE),
        (CALL_STUB, BlobKind::CallStub, 0),
    ] {
        map.insert(CodeBlob {
            start: addr(range.0),
            end: addr(range.1),
            kind,
            frame_size,
        })
        .expect("demo blobs do not overlap");
    }
    map
}

/// Lays out a compiled frame three words above `base`, called from the first
/// entry frame, with garbage below it.
fn lay_out_stack(base: u64, mut write: impl FnMut(u64, u64)) {
    let word = Host::WORD_SIZE;
    let sp = base + 3 * word;
    let entry_fp = base + 0x100;
    let wrapper = base + 0x180;

    write(base, 0x1234);
    write(base + word, entry_fp);
    write(sp + FRAME_SIZE - 2 * word, entry_fp);
    write(sp + FRAME_SIZE - word, CALL_STUB.0 + 8);
    write(
        (entry_fp as i64 + Host::ENTRY_FRAME_CALL_WRAPPER_OFFSET * word as i64) as u64,
        wrapper,
    );
    write(wrapper + 4 * word, 0);
}

fn report<V: Vm>(vm: &V, what: &str, guess: Option<FrameGuess>) {
    let Some(guess) = guess else {
        println!("{what}: no frame info available");
        return;
    };
    println!("{what}: {guess:?}");

    match walk::walk(vm, &guess) {
        Ok(frames) => {
            for (i, frame) in frames.enumerate() {
                match frame {
                    Ok(frame) => println!(
                        "  #{i} sp={:?} fp={:?} pc={:?}",
                        frame.sp(),
                        frame.fp(),
                        frame.pc()
                    ),
                    Err(fault) => println!("  #{i} <{fault}>"),
                }
            }
        }
        Err(err) => println!("  cannot walk: {err}"),
    }
}

fn main() {
    let registry = tracing_subscriber::Registry::default().with(
        EnvFilter::builder()
            .with_default_directive(tracing::Level::TRACE.into())
            .from_env()
            .unwrap(),
    );

    let tree_layer = tracing_tree::HierarchicalLayer::new(2)
        .with_targets(true)
        .with_bracketed_fields(true);

    registry.with(tree_layer).init();

    let window_words: u64 = std::env::args()
        .nth(1)
        .map(|arg| arg.parse().expect("window must be a number of words"))
        .unwrap_or(16);
    let window = window_words * Host::WORD_SIZE;

    // A copied stack image.
    let base = 0x7fff_0000;
    let mut image = StackImage::new(addr(base), 0x200);
    lay_out_stack(base, |at, value| {
        image.write_word(addr(at), value);
    });
    let vm = StackVm::<Host, _, _>::new(image, code_map());
    let thread = DemoThread {
        last_java: None,
        context: Context::new(),
    };
    let registers = RegisterSnapshot::new(Some(addr(base)), None, Some(addr(COMPILED.0 + 0x10)));
    report(&vm, "stack image", FrameGuesser::new(&vm).guess(&thread, &registers, window));

    // The same layout in our own memory, read back through the kernel.
    let mut stack = vec![0u64; 0x40].into_boxed_slice();
    let live_base = stack.as_ptr() as u64;
    lay_out_stack(live_base, |at, value| {
        stack[((at - live_base) / 8) as usize] = value;
    });
    let vm = StackVm::<Host, _, _>::new(ProcessMemory::current(), code_map());
    let registers = RegisterSnapshot::new(
        Some(addr(live_base)),
        None,
        Some(addr(COMPILED.0 + 0x10)),
    );
    let guess = FrameGuesser::new(&vm).guess(&thread, &registers, window);
    if let Some(sp) = guess.and_then(|guess| guess.sp) {
        println!("live: word at guessed sp = {:?}", vm.memory().read_word(sp));
    }
    report(&vm, "live", guess);

    // Our real registers: we are native code as far as any VM is concerned.
    let context = capture_context();
    let snapshot = RegisterSnapshot::from_context::<Host>(&context);
    if let Some(pc) = snapshot.pc {
        println!(
            "own pc {pc:?} is in {:?}",
            frameguess::identify::identify(pc.get() as usize)
        );
    }
    let native = DemoThread {
        last_java: None,
        context,
    };
    match FrameGuesser::new(&vm).guess_thread(&native, window) {
        Ok(guess) => report(&vm, "own thread", guess),
        Err(err) => println!("own thread: {err}"),
    }

    let checkpointed = DemoThread {
        last_java: Some((addr(live_base + 0x18), None, Some(addr(COMPILED.0 + 0x20)))),
        context: native.context,
    };
    match FrameGuesser::new(&vm).guess_thread(&checkpointed, window) {
        Ok(guess) => report(&vm, "own thread, last Java frame", guess),
        Err(err) => println!("own thread: {err}"),
    }
}
