// Crash capture — panic hook plus fatal-signal actions
//
// The handler must work from an async-signal-limited context: the shared
// state is a single atomic pointer, the drain takes only the ring mutex,
// the stack walk is a raw unsynchronized trace (no symbolization, which
// takes loader and allocator locks), and the journal write goes through the
// pre-allocated emergency path. Symbolized frames are captured only on the
// panic-hook path, which runs on an ordinary thread. After capture the
// previous action is restored and the signal re-raised so the OS still
// records a native crash report.

use super::{Collector, EntrySink};
use crate::model::{Category, CrashExtra, CrashFrame, LogEntry, LogExtra, LogLevel};
use std::sync::atomic::{AtomicPtr, Ordering};

#[cfg(unix)]
use std::mem::MaybeUninit;

struct CrashContext {
    sink: EntrySink,
}

static CONTEXT: AtomicPtr<CrashContext> = AtomicPtr::new(std::ptr::null_mut());

#[cfg(unix)]
const SIGNALS: [libc::c_int; 6] = [
    libc::SIGABRT,
    libc::SIGBUS,
    libc::SIGFPE,
    libc::SIGILL,
    libc::SIGSEGV,
    libc::SIGTRAP,
];

#[cfg(unix)]
static mut PREV_ACTIONS: [MaybeUninit<libc::sigaction>; 6] =
    [MaybeUninit::uninit(); 6];

pub struct CrashCollector;

impl CrashCollector {
    pub fn new() -> Self {
        CrashCollector
    }
}

impl Default for CrashCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CrashCollector {
    fn name(&self) -> &'static str {
        "crash"
    }

    fn start(&self, sink: EntrySink) {
        let context = Box::into_raw(Box::new(CrashContext { sink }));
        let old = CONTEXT.swap(context, Ordering::AcqRel);
        if !old.is_null() {
            unsafe { drop(Box::from_raw(old)) };
        }

        install_panic_hook();
        #[cfg(unix)]
        install_signal_actions();
    }

    fn stop(&self) {
        #[cfg(unix)]
        restore_signal_actions();

        // The panic hook stays installed but goes inert once the context is
        // gone; it chains to the previous hook either way.
        let old = CONTEXT.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if !old.is_null() {
            unsafe { drop(Box::from_raw(old)) };
        }
    }
}

fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        handle_panic(info);
        previous(info);
    }));
}

fn handle_panic(info: &std::panic::PanicHookInfo<'_>) {
    let context = CONTEXT.load(Ordering::Acquire);
    if context.is_null() {
        return;
    }
    let context = unsafe { &*context };

    let reason = if let Some(message) = info.payload().downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = info.payload().downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    };
    let reason = match info.location() {
        Some(location) => format!("{} at {}:{}", reason, location.file(), location.line()),
        None => reason,
    };

    let entry = LogEntry::new(
        LogLevel::Fatal,
        Category::CRASH,
        format!("Uncaught panic: {}", reason),
    )
    .with_extra(LogExtra::Crash(CrashExtra {
        signal: None,
        exception_type: Some("panic".to_string()),
        reason,
        frames: capture_frames(),
        thread: std::thread::current().name().map(str::to_string),
    }));

    context.sink.emit(entry);
    context.sink.emergency_flush();
}

#[cfg(unix)]
fn install_signal_actions() {
    for (slot, signal) in SIGNALS.iter().enumerate() {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = signal_handler as usize;
            libc::sigemptyset(&mut action.sa_mask);
            action.sa_flags = 0;

            let mut previous: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(*signal, &action, &mut previous) == 0 {
                std::ptr::addr_of_mut!(PREV_ACTIONS[slot]).write(MaybeUninit::new(previous));
            }
        }
    }
}

#[cfg(unix)]
fn restore_signal_actions() {
    for (slot, signal) in SIGNALS.iter().enumerate() {
        unsafe {
            let previous = std::ptr::addr_of!(PREV_ACTIONS[slot]).read().assume_init();
            libc::sigaction(*signal, &previous, std::ptr::null_mut());
        }
    }
}

/// Deepest stack walk recorded from the signal handler.
#[cfg(unix)]
const MAX_SIGNAL_FRAMES: usize = 64;

#[cfg(unix)]
extern "C" fn signal_handler(signal: libc::c_int) {
    let context = CONTEXT.load(Ordering::Acquire);
    if !context.is_null() {
        let context = unsafe { &*context };
        let name = signal_name(signal);

        // Raw program counters only. Resolving them would re-enter the
        // dynamic loader; the viewer symbolizes offline.
        let mut addresses = [0usize; MAX_SIGNAL_FRAMES];
        let mut depth = 0;
        unsafe {
            backtrace::trace_unsynchronized(|frame| {
                if depth == MAX_SIGNAL_FRAMES {
                    return false;
                }
                addresses[depth] = frame.ip() as usize;
                depth += 1;
                true
            });
        }
        let frames = addresses[..depth]
            .iter()
            .map(|ip| CrashFrame::unparsed(format!("{:#x}", ip)))
            .collect();

        let entry = LogEntry::new(
            LogLevel::Fatal,
            Category::CRASH,
            format!("Fatal signal {}", name),
        )
        .with_extra(LogExtra::Crash(CrashExtra {
            signal: Some(name.to_string()),
            exception_type: None,
            reason: format!("Process received {}", name),
            frames,
            thread: None,
        }));
        context.sink.emit(entry);
        context.sink.emergency_flush();
    }

    // Put the previous action back and re-raise so the OS writes its own
    // crash report and the exit status reflects the signal.
    unsafe {
        if let Some(slot) = SIGNALS.iter().position(|s| *s == signal) {
            let previous = std::ptr::addr_of!(PREV_ACTIONS[slot]).read().assume_init();
            libc::sigaction(signal, &previous, std::ptr::null_mut());
        }
        libc::raise(signal);
    }
}

#[cfg(unix)]
fn signal_name(signal: libc::c_int) -> &'static str {
    match signal {
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGILL => "SIGILL",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGTRAP => "SIGTRAP",
        _ => "UNKNOWN",
    }
}

/// Symbolize the current stack. Panic-hook path only — symbolization is not
/// async-signal-safe. Frames without symbol information become single-field
/// raw frames.
fn capture_frames() -> Vec<CrashFrame> {
    let backtrace = backtrace::Backtrace::new();
    let mut frames = Vec::new();
    for (index, frame) in backtrace.frames().iter().enumerate() {
        let address = format!("{:p}", frame.ip());
        match frame.symbols().first() {
            Some(symbol) => {
                let name = symbol.name().map(|n| n.to_string());
                let module = symbol
                    .filename()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned());
                if name.is_none() && module.is_none() {
                    frames.push(CrashFrame::unparsed(address));
                } else {
                    frames.push(CrashFrame {
                        index: Some(index as u32),
                        module,
                        address: Some(address),
                        symbol: name,
                        raw: None,
                    });
                }
            }
            None => frames.push(CrashFrame::unparsed(address)),
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_capture_frames_is_non_empty() {
        let frames = capture_frames();
        assert!(!frames.is_empty());
        // Every frame either parsed into fields or fell back to raw.
        for frame in &frames {
            assert!(frame.raw.is_some() || frame.address.is_some());
        }
    }

    // Single test for the whole hook lifecycle: the panic hook and signal
    // actions are process-global, so splitting this into parallel tests
    // would race on the shared context.
    #[test]
    fn test_panic_capture_lifecycle() {
        let collector = CrashCollector::new();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let flushes = Arc::new(AtomicUsize::new(0));

        let captured_clone = captured.clone();
        let flushes_clone = flushes.clone();
        collector.start(EntrySink::new(
            Arc::new(move |entry| captured_clone.lock().push(entry)),
            Arc::new(move || {
                flushes_clone.fetch_add(1, Ordering::SeqCst);
            }),
        ));

        let worker = std::thread::Builder::new()
            .name("doomed".to_string())
            .spawn(|| panic!("intentional test panic"))
            .expect("spawn");
        assert!(worker.join().is_err());

        {
            let captured = captured.lock();
            assert_eq!(captured.len(), 1);
            let entry = &captured[0];
            assert_eq!(entry.level, LogLevel::Fatal);
            assert_eq!(entry.category, Category::CRASH);
            assert!(entry.message.contains("intentional test panic"));
            let Some(LogExtra::Crash(extra)) = &entry.extra else {
                panic!("expected crash extra");
            };
            assert_eq!(extra.exception_type.as_deref(), Some("panic"));
            assert_eq!(extra.thread.as_deref(), Some("doomed"));
        }
        assert_eq!(flushes.load(Ordering::SeqCst), 1);

        // After stop the hook goes inert: nothing new is captured.
        collector.stop();
        let worker = std::thread::spawn(|| panic!("after stop"));
        assert!(worker.join().is_err());
        assert_eq!(captured.lock().len(), 1);
    }
}
