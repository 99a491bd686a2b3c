// SPDX-License-Identifier: MPL-2.0

use std::{fs, path::PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

const IMAGE_SIZE: u64 = 64 * 1024;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pass"), b"correct horse\n").unwrap();
        fs::write(dir.path().join("other"), b"battery staple\n").unwrap();
        fs::write(dir.path().join("wrong"), b"wrong\n").unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn bdectl<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut command = Command::cargo_bin("bdectl").unwrap();
        command.current_dir(self.dir.path()).args(args);
        command
    }

    fn init(&self, extra: &[&str]) {
        self.bdectl(["init", "disk.img", "--passphrase-file", "pass", "--iterations", "16"])
            .args(["--size", &IMAGE_SIZE.to_string()])
            .args(extra)
            .assert()
            .success();
    }
}

#[test]
fn init_then_info() {
    let ws = Workspace::new();
    ws.init(&["--sector-size", "4096"]);

    let output = ws.bdectl(["info", "disk.img"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("sector size: 4096"));
    assert!(stdout.contains("data offset: 20480"));
    assert!(stdout.contains("slot 0:      active, 16 iterations"));
    assert!(stdout.contains("slot 3:      empty"));
}

#[test]
fn written_data_reads_back_and_is_encrypted_at_rest() {
    let ws = Workspace::new();
    ws.init(&[]);
    let data: Vec<u8> = (0..1024).map(|i| (i % 253) as u8).collect();
    fs::write(ws.path("plain"), &data).unwrap();

    ws.bdectl(["write", "disk.img", "--passphrase-file", "pass"])
        .args(["--offset", "512", "--input", "plain"])
        .assert()
        .success();
    ws.bdectl(["read", "disk.img", "--passphrase-file", "pass"])
        .args(["--offset", "512", "--length", "1024"])
        .assert()
        .success()
        .stdout(data.clone());

    let image = fs::read(ws.path("disk.img")).unwrap();
    let stored = &image[5 * 512 + 512..5 * 512 + 1536];
    assert_ne!(stored, &data[..]);
}

#[test]
fn wrong_passphrase_is_reported() {
    let ws = Workspace::new();
    ws.init(&[]);

    ws.bdectl(["read", "disk.img", "--passphrase-file", "wrong"])
        .args(["--offset", "0", "--length", "512"])
        .assert()
        .code(4);
}

#[test]
fn bad_ranges_are_reported() {
    let ws = Workspace::new();
    ws.init(&[]);

    ws.bdectl(["read", "disk.img", "--passphrase-file", "pass"])
        .args(["--offset", "100", "--length", "512"])
        .assert()
        .code(1);
    ws.bdectl(["read", "disk.img", "--passphrase-file", "pass"])
        .args(["--offset", &IMAGE_SIZE.to_string(), "--length", "512"])
        .assert()
        .code(1);
}

#[test]
fn garbage_image_is_reported() {
    let ws = Workspace::new();
    fs::write(ws.path("disk.img"), vec![0x5a; IMAGE_SIZE as usize]).unwrap();

    ws.bdectl(["info", "disk.img"]).assert().code(5);
}

#[test]
fn key_slots_are_managed() {
    let ws = Workspace::new();
    ws.init(&[]);

    ws.bdectl(["setkey", "disk.img", "--passphrase-file", "pass"])
        .args(["--new-passphrase-file", "other", "--iterations", "16"])
        .assert()
        .success()
        .stdout("key slot 1 set\n");
    ws.bdectl(["nuke", "disk.img", "--passphrase-file", "other", "--slot", "0"])
        .assert()
        .success();

    ws.bdectl(["read", "disk.img", "--passphrase-file", "pass"])
        .args(["--offset", "0", "--length", "512"])
        .assert()
        .code(4);
    ws.bdectl(["read", "disk.img", "--passphrase-file", "other"])
        .args(["--offset", "0", "--length", "512"])
        .assert()
        .success();

    ws.bdectl(["destroy", "disk.img", "--passphrase-file", "other"])
        .assert()
        .success();
    ws.bdectl(["read", "disk.img", "--passphrase-file", "other"])
        .args(["--offset", "0", "--length", "512"])
        .assert()
        .code(4);
}

#[test]
fn configuration_file_is_honored() {
    let ws = Workspace::new();
    fs::write(
        ws.path("bdectl.toml"),
        "[format]\nsector-size = 1024\nkdf-iterations = 16\n",
    )
    .unwrap();

    ws.bdectl(["init", "disk.img", "--passphrase-file", "pass", "--size", "65536"])
        .assert()
        .success();
    let output = ws.bdectl(["info", "disk.img"]).output().unwrap();
    assert!(String::from_utf8_lossy(&output.stdout).contains("sector size: 1024"));

    fs::write(ws.path("bad.toml"), "[format]\nblock-size = 1\n").unwrap();
    ws.bdectl(["--config", "bad.toml", "info", "disk.img"])
        .assert()
        .code(3);
}
