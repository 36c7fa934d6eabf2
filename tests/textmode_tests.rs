// Integration tests for the text-mode console session
//
// Terminal settings and the host screen are replaced by spies that record
// every call into one shared journal, so ordering can be asserted.

use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::Mutex;

use inst_console::{
    ConsoleError, HostUi, ModuleResult, ModuleRunner, MultiplexerKind, TerminalSettings,
    TextModeMultiplexer,
};

static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> std::sync::MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

type Journal = Rc<RefCell<Vec<String>>>;

struct SpySettings {
    journal: Journal,
    token: String,
}

impl TerminalSettings for SpySettings {
    fn save(&self) -> inst_console::Result<String> {
        self.journal.borrow_mut().push("save".into());
        Ok(self.token.clone())
    }

    fn restore(&self, token: &str) -> inst_console::Result<()> {
        self.journal.borrow_mut().push(format!("restore {}", token));
        Ok(())
    }

    fn force_baseline(&self) -> inst_console::Result<()> {
        self.journal.borrow_mut().push("baseline".into());
        Ok(())
    }

    fn register_exit_fallback(&self) {
        self.journal.borrow_mut().push("exit-fallback".into());
    }
}

struct SpyHost {
    journal: Journal,
}

impl HostUi for SpyHost {
    fn is_wizard_dialog(&self) -> bool {
        true
    }

    fn show_message(&self, message: &str) {
        self.journal.borrow_mut().push(format!("message {}", message));
    }

    fn release_screen(&self) -> inst_console::Result<()> {
        self.journal.borrow_mut().push("release".into());
        Ok(())
    }

    fn acquire_screen(&self) -> inst_console::Result<()> {
        self.journal.borrow_mut().push("acquire".into());
        Ok(())
    }
}

struct SpyRunner {
    journal: Journal,
}

impl ModuleRunner for SpyRunner {
    fn run_module(&self, name: &str, _args: &[String]) -> inst_console::Result<ModuleResult> {
        self.journal.borrow_mut().push(format!("module {}", name));
        if name == "inst_broken" {
            return Err(ConsoleError::module("inst_broken failed"));
        }
        Ok(ModuleResult::new())
    }
}

struct Fixture {
    journal: Journal,
    host: SpyHost,
    runner: SpyRunner,
}

impl Fixture {
    fn new() -> Self {
        let journal: Journal = Rc::default();
        Self {
            host: SpyHost {
                journal: Rc::clone(&journal),
            },
            runner: SpyRunner {
                journal: Rc::clone(&journal),
            },
            journal,
        }
    }

    fn mux(&self) -> TextModeMultiplexer<'_> {
        TextModeMultiplexer::new(
            &self.host,
            &self.runner,
            Box::new(SpySettings {
                journal: Rc::clone(&self.journal),
                token: "500:5:bf:8a3b:3:1c:7f:15:4:0:1:0".into(),
            }),
        )
    }

    fn entries(&self) -> Vec<String> {
        self.journal.borrow().clone()
    }

    fn note(&self, entry: &str) {
        self.journal.borrow_mut().push(entry.to_string());
    }
}

#[test]
fn test_open_sequence_and_exact_restore() {
    let _serial = serial();
    let fixture = Fixture::new();
    let mux = fixture.mux();

    let kind = mux
        .open(|session| {
            fixture.note("body");
            Ok(session.kind())
        })
        .unwrap();

    assert_eq!(kind, MultiplexerKind::Text);
    assert_eq!(
        fixture.entries(),
        vec![
            "save",
            "release",
            "baseline",
            "exit-fallback",
            "body",
            "restore 500:5:bf:8a3b:3:1c:7f:15:4:0:1:0",
            "acquire",
        ]
    );
}

#[test]
fn test_failing_body_restores_same_token() {
    let _serial = serial();
    let fixture = Fixture::new();
    let mux = fixture.mux();

    let result: inst_console::Result<()> = mux.open(|_| Err(ConsoleError::module("boom")));

    assert!(matches!(result, Err(ConsoleError::Module(_))));
    let entries = fixture.entries();
    assert_eq!(
        &entries[entries.len() - 2..],
        &["restore 500:5:bf:8a3b:3:1c:7f:15:4:0:1:0", "acquire"]
    );
    assert!(!inst_console::session::is_session_open());
}

#[test]
fn test_panicking_body_restores_same_token() {
    let _serial = serial();
    let fixture = Fixture::new();
    let mux = fixture.mux();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let _: inst_console::Result<()> = mux.open(|_| panic!("body panicked on purpose"));
    }));

    assert!(outcome.is_err());
    assert!(fixture
        .entries()
        .contains(&"restore 500:5:bf:8a3b:3:1c:7f:15:4:0:1:0".to_string()));
    assert_eq!(fixture.entries().last().map(String::as_str), Some("acquire"));
}

#[test]
fn test_run_module_borrows_screen_back() {
    let _serial = serial();
    let fixture = Fixture::new();
    let mux = fixture.mux();

    mux.open(|session| {
        fixture.journal.borrow_mut().clear();
        session.run_module("inst_lan", &[])?;
        let failed = session.run_module("inst_broken", &[]);
        assert!(failed.is_err());
        fixture.note("body done");
        Ok(())
    })
    .unwrap();

    assert_eq!(
        &fixture.entries()[..7],
        &[
            "acquire",
            "module inst_lan",
            "release",
            "acquire",
            "module inst_broken",
            "release",
            "body done",
        ]
    );
}

#[test]
fn test_second_session_is_rejected_while_open() {
    let _serial = serial();
    let fixture = Fixture::new();
    let mux = fixture.mux();
    let other = fixture.mux();

    let nested = mux.open(|_| Ok(other.open(|_| Ok(())))).unwrap();
    assert!(matches!(nested, Err(ConsoleError::SessionActive)));
}
