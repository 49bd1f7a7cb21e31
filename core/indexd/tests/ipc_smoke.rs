use indexd_protocol::{Client, Command, Request, Response};
use std::fs;
use std::io::{BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command as Process, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

struct Fixture {
    root: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().expect("Failed to create temp root");
        let fixture = Self { root };
        let system = fixture.system_apps();
        let user = fixture.user_apps();
        fs::create_dir_all(&system).expect("create system apps");
        fs::create_dir_all(&user).expect("create user apps");
        fs::create_dir_all(fixture.root.path().join("home")).expect("create home");

        write_app(&system, "dummy.desktop", "Old Dummy", "old-dummy", "");
        write_app(
            &system,
            "editor.desktop",
            "Text Editor",
            "editor %F",
            "Categories=Utility;Development;\n",
        );
        write_app(
            &user,
            "dummy.desktop",
            "Dummy App",
            "dummy-app %U",
            "Name[ru]=Тестовое Приложение\nCategories=Utility;\n",
        );
        write_app(&user, "game.desktop", "Chess", "chess", "Categories=Game;\n");
        write_app(&user, "hidden.desktop", "Hidden Helper", "helper", "NoDisplay=true\n");
        let marker = fixture.marker();
        write_app(
            &user,
            "launchme.desktop",
            "Marker Writer",
            &format!("sh -c 'echo launched > \"{}\"'", marker.display()),
            "",
        );
        fixture
    }

    fn system_apps(&self) -> PathBuf {
        self.root.path().join("system").join("applications")
    }

    fn user_apps(&self) -> PathBuf {
        self.root.path().join("data").join("applications")
    }

    fn socket(&self) -> PathBuf {
        self.root.path().join("run").join("indexd.sock")
    }

    fn marker(&self) -> PathBuf {
        self.root.path().join("launched.txt")
    }

    fn bin(&self) -> PathBuf {
        self.root.path().join("bin")
    }

    fn spawn(&self) -> DaemonGuard {
        self.spawn_with(&[])
    }

    fn spawn_with(&self, extra_env: &[(&str, String)]) -> DaemonGuard {
        let root = self.root.path();
        let mut command = Process::new(env!("CARGO_BIN_EXE_indexd"));
        command
            .env("HOME", root.join("home"))
            .env("XDG_DATA_HOME", root.join("data"))
            .env("XDG_DATA_DIRS", root.join("system"))
            .env("ADE_INDEXD_SOCK", self.socket())
            .env("ADE_INDEXD_CONFIG", root.join("missing.toml"))
            .env("ADE_INDEXD_WATCH", "0")
            .env("ADE_INDEXD_EXECUTABLES", "0")
            .env("ADE_INDEXD_WORKERS", "4");
        for (key, value) in extra_env {
            command.env(key, value);
        }
        let child = command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to spawn indexd");
        let guard = DaemonGuard { child };
        wait_for_socket(&self.socket(), Duration::from_secs(5));
        guard
    }

    fn connect(&self) -> Client {
        let client = Client::connect(&self.socket()).expect("Failed to connect to indexd");
        client
            .set_timeout(Some(Duration::from_secs(5)))
            .expect("Failed to set timeout");
        client
    }
}

fn write_executable(dir: &Path, file: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    fs::create_dir_all(dir).expect("create bin dir");
    let path = dir.join(file);
    fs::write(&path, "#!/bin/sh\nexit 0\n").expect("write executable");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

fn write_app(dir: &Path, file: &str, name: &str, exec: &str, extra: &str) {
    fs::write(
        dir.join(file),
        format!("[Desktop Entry]\nType=Application\nName={name}\nExec={exec}\n{extra}"),
    )
    .expect("write descriptor");
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for indexd socket at {}", path.display());
}

fn assert_len_matches_body(response: &Response) {
    let len: usize = response
        .header("len")
        .expect("len header")
        .parse()
        .expect("numeric len");
    assert_eq!(len, response.body().len());
}

#[test]
fn filter_lang_and_run_scenarios() {
    let fixture = Fixture::new();
    let _guard = fixture.spawn();
    let mut client = fixture.connect();

    let all = client.list().expect("list");
    assert_eq!(all.header("cmd"), Some("list"));
    assert_eq!(all.status(), Some(0));
    assert_len_matches_body(&all);
    assert!(!all.body().is_empty());
    let unfiltered = all.body().to_vec();

    let filtered = client
        .command_with("+filter-name", "Dummy")
        .expect("+filter-name");
    assert_eq!(filtered.header("cmd"), Some("+filter-name"));
    assert_eq!(filtered.status(), Some(0));
    let listed = client.list().expect("list");
    assert!(listed.body().iter().any(|name| name.contains("Dummy")));
    assert_len_matches_body(&listed);

    client
        .command_with("filter-name", "NonExistentThing")
        .expect("filter-name");
    let empty = client.list().expect("list");
    assert_eq!(empty.header("len"), Some("0"));
    assert!(empty.body().is_empty());

    let reset = client.command("0filters").expect("0filters");
    assert_eq!(reset.header("cmd"), Some("0filters"));
    let restored = client.list().expect("list");
    assert_eq!(restored.body(), unfiltered.as_slice());

    let lang = client.command_with("lang", "ru").expect("lang");
    assert_eq!(lang.header("lang"), Some("ru"));
    let localized = client.list().expect("list");
    assert!(localized
        .body()
        .iter()
        .any(|name| name == "Тестовое Приложение"));
    client.command_with("lang", "").expect("lang reset");

    client.command_with("+filter-cat", "Utility").expect("+filter-cat");
    client.command_with("+filter-name", "Dummy").expect("+filter-name");
    let combined = client.list().expect("list");
    assert_eq!(combined.body(), ["Dummy App"]);

    let run = client
        .send(&Request::with_argument(Command::Run, "999999"))
        .expect("run");
    assert_eq!(run.header("error-cmd"), Some("run"));
    assert_ne!(run.status(), Some(0));
}

#[test]
fn overrides_and_hidden_entries_shape_the_list() {
    let fixture = Fixture::new();
    let _guard = fixture.spawn();
    let mut client = fixture.connect();

    let all = client.list().expect("list");
    assert_eq!(
        all.body(),
        ["Dummy App", "Text Editor", "Chess", "Marker Writer"]
    );
}

#[test]
fn sessions_are_isolated() {
    let fixture = Fixture::new();
    let _guard = fixture.spawn();
    let mut russian = fixture.connect();
    let mut plain = fixture.connect();

    russian.command_with("lang", "ru").expect("lang");
    russian.command_with("filter-cat", "Game").expect("filter-cat");

    let plain_list = plain.list().expect("plain list");
    assert!(plain_list.body().iter().any(|name| name == "Dummy App"));
    assert!(plain_list.body().len() > 1);

    let russian_list = russian.list().expect("russian list");
    assert_eq!(russian_list.body(), ["Chess"]);

    let fresh = fixture.connect().list().expect("fresh list");
    assert_eq!(fresh.body(), plain_list.body());
}

#[test]
fn raw_wire_requests_are_accepted() {
    let fixture = Fixture::new();
    let _guard = fixture.spawn();
    let mut client = fixture.connect();

    let bare_id = client.send_raw(b"999999\nrun\n").expect("run");
    assert_eq!(bare_id.header("error-cmd"), Some("run"));

    let prefixed = client
        .send_raw(b"TXT01\"Dummy\nTXT01+filter-name\n")
        .expect("prefixed filter");
    assert_eq!(prefixed.header("cmd"), Some("+filter-name"));

    let commented = client.send_raw(b"# comment\n\nlist\n").expect("list");
    assert_eq!(commented.body(), ["Dummy App"]);

    let unknown = client.command("saveconf").expect("unknown");
    assert_eq!(unknown.header("error-cmd"), Some("saveconf"));
    let still_alive = client.list().expect("list after error");
    assert_eq!(still_alive.status(), Some(0));
}

#[test]
fn bad_magic_is_rejected() {
    let fixture = Fixture::new();
    let _guard = fixture.spawn();

    let mut stream = UnixStream::connect(fixture.socket()).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    stream.write_all(b"HTTP1list\n").expect("write");
    let mut reader = BufReader::new(stream);
    let response = Response::read_from(&mut reader).expect("error response");
    assert_eq!(response.header("error-cmd"), Some("parser"));
    assert_ne!(response.status(), Some(0));

    let mut client = fixture.connect();
    assert_eq!(client.list().expect("list").status(), Some(0));
}

#[test]
fn run_launches_detached_process() {
    let fixture = Fixture::new();
    let _guard = fixture.spawn();
    let mut client = fixture.connect();

    let response = client
        .send(&Request::with_argument(Command::Run, "5"))
        .expect("run");
    assert_eq!(response.header("cmd"), Some("run"));
    assert_eq!(response.status(), Some(0));
    assert_eq!(response.header("idx"), Some("5"));
    assert!(response.header("pid").is_some());

    let deadline = Instant::now() + Duration::from_secs(5);
    while !fixture.marker().exists() {
        assert!(Instant::now() < deadline, "launched process never ran");
        sleep(Duration::from_millis(25));
    }
}

#[test]
fn reindex_picks_up_new_descriptors() {
    let fixture = Fixture::new();
    let _guard = fixture.spawn();
    let mut client = fixture.connect();

    write_app(&fixture.user_apps(), "zeta.desktop", "Zeta", "zeta", "");
    let reindex = client.command("reindex").expect("reindex");
    assert_eq!(reindex.status(), Some(0));
    assert_eq!(reindex.header("entries"), Some("6"));
    assert_eq!(reindex.header("generation"), Some("2"));

    let listed = client.list().expect("list");
    assert_eq!(listed.body().last().map(String::as_str), Some("Zeta"));
}

#[test]
fn watcher_picks_up_new_descriptors_without_reindex() {
    let fixture = Fixture::new();
    let _guard = fixture.spawn_with(&[("ADE_INDEXD_WATCH", "1".to_string())]);
    let mut client = fixture.connect();
    assert_eq!(client.list().expect("list").body().len(), 4);

    write_app(&fixture.user_apps(), "zeta.desktop", "Zeta", "zeta", "");
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let listed = client.list().expect("list");
        if listed.body().last().map(String::as_str) == Some("Zeta") {
            break;
        }
        assert!(Instant::now() < deadline, "watcher never picked up zeta.desktop");
        sleep(Duration::from_millis(100));
    }
}

#[test]
fn executables_from_search_path_are_listed_after_applications() {
    let fixture = Fixture::new();
    write_executable(&fixture.bin(), "zz-tool");
    let _guard = fixture.spawn_with(&[
        ("ADE_INDEXD_EXECUTABLES", "1".to_string()),
        ("PATH", fixture.bin().display().to_string()),
    ]);
    let mut client = fixture.connect();

    let all = client.list().expect("list");
    assert_eq!(
        all.body(),
        ["Dummy App", "Text Editor", "Chess", "Marker Writer", "zz-tool"]
    );
    client
        .command_with("filter-path", &fixture.bin().display().to_string())
        .expect("filter-path");
    assert_eq!(client.list().expect("list").body(), ["zz-tool"]);
}

#[test]
fn reindex_with_paths_scans_those_executables() {
    let fixture = Fixture::new();
    let extra = fixture.root.path().join("extra-bin");
    write_executable(&extra, "extra-tool");
    let _guard = fixture.spawn();
    let mut client = fixture.connect();

    let reindex = client
        .send(&Request::with_argument(
            Command::Reindex,
            &extra.display().to_string(),
        ))
        .expect("reindex");
    assert_eq!(reindex.status(), Some(0));
    assert_eq!(reindex.header("entries"), Some("6"));
    let listed = client.list().expect("list");
    assert_eq!(listed.body().last().map(String::as_str), Some("extra-tool"));

    let relative = client
        .send(&Request::with_argument(Command::Reindex, "relative/bin"))
        .expect("reindex relative");
    assert_eq!(relative.header("error-cmd"), Some("reindex"));
}

#[test]
fn sigterm_removes_socket() {
    let fixture = Fixture::new();
    let mut guard = fixture.spawn();
    fixture.connect().list().expect("daemon ready");

    let pid = guard.child.id() as libc::pid_t;
    // SAFETY: sending a signal to our own child process.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    assert_eq!(rc, 0);

    let status = guard.child.wait().expect("wait for daemon");
    assert!(status.success());
    assert!(!fixture.socket().exists());
}
