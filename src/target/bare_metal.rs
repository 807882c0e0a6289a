// src/target/bare_metal.rs

//! MicroPython boards driven through the raw REPL
//!
//! Every operation is a small Python script submitted in raw mode. The
//! board answers `OK`, then the script's stdout, EOT, its stderr, EOT and
//! the raw prompt. Values travel back as JSON between `<pipkin>` markers.

use super::connection::Connection;
use super::{Target, parent_path};
use crate::error::{Error, Result};
use crate::pyliteral::{py_bytes, py_str};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const RAW_MODE_CMD: &[u8] = b"\x01";
const NORMAL_MODE_CMD: &[u8] = b"\x02";
const INTERRUPT_CMD: &[u8] = b"\x03";
const EOT: u8 = 0x04;

const FIRST_RAW_PROMPT: &[u8] = b"raw REPL; CTRL-B to exit\r\n>";
const RAW_PROMPT: &[u8] = b"\x04>";
const NORMAL_PROMPT: &[u8] = b">>> ";
const PROMPT_MARKERS: [&[u8]; 3] = [NORMAL_PROMPT, RAW_PROMPT, FIRST_RAW_PROMPT];

const OK: &[u8] = b"OK";
const TRACEBACK_MARKER: &str = "Traceback (most recent call last):";

const MGMT_VALUE_START: &str = "<pipkin>";
const MGMT_VALUE_END: &str = "</pipkin>";

/// How long to wait for something that should appear quickly
const WAIT_OR_CRASH_TIMEOUT: Duration = Duration::from_secs(5);
const INTERVENTION_TIMEOUT: Duration = Duration::from_millis(100);

const SUBMIT_BLOCK_SIZE: usize = 255;
const SUBMIT_BLOCK_DELAY: Duration = Duration::from_millis(10);
const FILE_BLOCK_SIZE: usize = 1024;

/// Install directories preferred over anything else found on `sys.path`
const PREFERRED_INSTALL_DIRS: [&str; 3] = ["/flash/lib", "/flash/libs", "/lib"];

/// Files transferred verbatim even when hex transfer is available
const TEXT_SUFFIXES: [&str; 5] = [".py", ".txt", ".csv", "metadata", "record"];

const HELPER_SCRIPT: &str = "\
class __pipkin_helper:
    import builtins
    try:
        import uos as os
    except builtins.ImportError:
        import os
    import sys
    try:
        import ujson as json
    except builtins.ImportError:
        import json

    @builtins.classmethod
    def print_mgmt_value(cls, obj):
        cls.builtins.print('<pipkin>', cls.json.dumps(obj), '</pipkin>', sep='', end='')
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prompt {
    Normal,
    Raw,
    FirstRaw,
}

impl Prompt {
    fn marker(self) -> &'static [u8] {
        match self {
            Self::Normal => NORMAL_PROMPT,
            Self::Raw => RAW_PROMPT,
            Self::FirstRaw => FIRST_RAW_PROMPT,
        }
    }

    fn is_raw(self) -> bool {
        matches!(self, Self::Raw | Self::FirstRaw)
    }
}

pub struct BareMetalTarget<C: Connection> {
    connection: C,
    last_prompt: Option<Prompt>,
    binascii: Option<String>,
    install_dir: String,
    known_dirs: HashSet<String>,
    submit_block_delay: Duration,
}

impl<C: Connection> BareMetalTarget<C> {
    /// Interrupt whatever runs on the board, enter raw mode and install
    /// the helper the other scripts rely on
    pub fn connect(connection: C) -> Result<Self> {
        Self::connect_with_delay(connection, SUBMIT_BLOCK_DELAY)
    }

    fn connect_with_delay(mut connection: C, submit_block_delay: Duration) -> Result<Self> {
        connection.set_text_mode(true);
        let mut target = Self {
            connection,
            last_prompt: None,
            binascii: None,
            install_dir: String::new(),
            known_dirs: HashSet::new(),
            submit_block_delay,
        };

        target.interrupt_to_prompt()?;
        target.execute_without_output(HELPER_SCRIPT)?;

        let modules = target.fetch_builtin_modules()?;
        debug!("Builtin modules: {:?}", modules);
        target.binascii = ["binascii", "ubinascii"]
            .into_iter()
            .find(|m| modules.iter().any(|b| b == m))
            .map(str::to_string);

        let sys_path: Vec<String> = target.evaluate("__pipkin_helper.sys.path")?;
        target.install_dir = choose_install_dir(&sys_path).ok_or_else(|| {
            Error::user(format!(
                "Could not choose an installation directory from sys.path {sys_path:?}"
            ))
        })?;
        info!("Installing to {} on the device", target.install_dir);
        Ok(target)
    }

    fn interrupt_to_prompt(&mut self) -> Result<()> {
        // Interrupt twice before asking for raw mode, some boards get stuck otherwise
        for cmd in [INTERRUPT_CMD, INTERRUPT_CMD, RAW_MODE_CMD] {
            self.write(cmd)?;
            match self.discard_output_until_prompt(INTERVENTION_TIMEOUT) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_communication() => {
                    debug!("No prompt after intervention {:?}: {}", cmd, e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Communication("Could not get raw REPL".to_string()))
    }

    fn ensure_raw_mode(&mut self) -> Result<()> {
        if self.last_prompt.is_some_and(Prompt::is_raw) {
            return Ok(());
        }
        debug!("Requesting raw mode at {:?}", self.last_prompt);
        self.write(RAW_MODE_CMD)?;
        self.discard_output_until_prompt(WAIT_OR_CRASH_TIMEOUT)?;
        if self.last_prompt == Some(Prompt::Normal) {
            info!("Found normal prompt instead of expected raw prompt. Trying again.");
            self.write(RAW_MODE_CMD)?;
            self.discard_output_until_prompt(WAIT_OR_CRASH_TIMEOUT)?;
        }
        if self.last_prompt != Some(Prompt::FirstRaw) {
            return Err(Error::Communication(format!(
                "Could not enter raw prompt, got {:?}",
                self.last_prompt
            )));
        }
        Ok(())
    }

    fn ensure_normal_mode(&mut self) -> Result<()> {
        if self.last_prompt == Some(Prompt::Normal) {
            return Ok(());
        }
        self.write(NORMAL_MODE_CMD)?;
        self.discard_output_until_prompt(WAIT_OR_CRASH_TIMEOUT)?;
        if self.last_prompt != Some(Prompt::Normal) {
            return Err(Error::Communication(format!(
                "Could not get normal prompt, got {:?}",
                self.last_prompt
            )));
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.iter().any(|&b| matches!(b, 0x01..=0x05)) {
            debug!("Sending ctrl chars: {:?}", String::from_utf8_lossy(data));
        }
        let written = self.connection.write(data)?;
        if written != data.len() {
            return Err(Error::Communication(format!(
                "Wrote {written} bytes instead of {}",
                data.len()
            )));
        }
        Ok(())
    }

    fn submit(&mut self, script: &str) -> Result<()> {
        self.ensure_raw_mode()?;

        let mut to_be_written = script.as_bytes().to_vec();
        to_be_written.push(EOT);
        let mut blocks = to_be_written.chunks(SUBMIT_BLOCK_SIZE).peekable();
        while let Some(block) = blocks.next() {
            self.write(block)?;
            if blocks.peek().is_some() {
                thread::sleep(self.submit_block_delay);
            }
        }

        let confirmation = self.connection.read(OK.len(), WAIT_OR_CRASH_TIMEOUT)?;
        if confirmation != OK {
            let mut data = confirmation;
            data.extend(self.connection.read_all());
            return Err(Error::Communication(format!(
                "Could not read command confirmation, got {:?}",
                String::from_utf8_lossy(&data)
            )));
        }
        Ok(())
    }

    /// Collect output up to the next prompt, split into stdout and stderr
    fn capture_output_until_prompt(&mut self, timeout: Duration) -> Result<(String, String)> {
        let data = self.connection.read_until(&PROMPT_MARKERS, timeout)?;
        let prompt = [Prompt::Normal, Prompt::Raw, Prompt::FirstRaw]
            .into_iter()
            .find(|p| data.ends_with(p.marker()))
            .ok_or_else(|| {
                Error::Communication(format!(
                    "Expected a prompt, got {:?}",
                    String::from_utf8_lossy(&data)
                ))
            })?;
        self.last_prompt = Some(prompt);

        let content = &data[..data.len() - prompt.marker().len()];
        let (out, err) = match content.iter().position(|&b| b == EOT) {
            Some(pos) => (&content[..pos], &content[pos + 1..]),
            None => (content, &[][..]),
        };
        let out = String::from_utf8_lossy(out).into_owned();
        let err = String::from_utf8_lossy(err).into_owned();

        // Outside raw mode tracebacks arrive on the same stream as output
        if err.is_empty() {
            if let Some(pos) = out.find(TRACEBACK_MARKER) {
                return Ok((out[..pos].to_string(), out[pos..].to_string()));
            }
        }
        Ok((out, err))
    }

    fn discard_output_until_prompt(&mut self, timeout: Duration) -> Result<()> {
        let (out, err) = self.capture_output_until_prompt(timeout)?;
        for (stream, data) in [("stdout", out), ("stderr", err)] {
            if !data.is_empty() {
                info!("Discarding {}: {:?}", stream, data);
            }
        }
        Ok(())
    }

    fn execute_and_capture_output(&mut self, script: &str) -> Result<(String, String)> {
        self.submit(script)?;
        self.capture_output_until_prompt(WAIT_OR_CRASH_TIMEOUT)
    }

    fn execute_without_output(&mut self, script: &str) -> Result<()> {
        let (out, err) = self.execute_and_capture_output(script)?;
        if !out.is_empty() || !err.is_empty() {
            return Err(Error::management(
                "Command output was not empty",
                script,
                out,
                err,
            ));
        }
        Ok(())
    }

    /// Value of a single Python expression
    fn evaluate<T: DeserializeOwned>(&mut self, expression: &str) -> Result<T> {
        self.evaluate_script(&format!("__pipkin_helper.print_mgmt_value({expression})"))
    }

    /// Value printed by a script that calls `print_mgmt_value` itself
    fn evaluate_script<T: DeserializeOwned>(&mut self, script: &str) -> Result<T> {
        let (out, err) = self.execute_and_capture_output(script)?;
        if !err.is_empty() {
            return Err(Error::management("Script produced errors", script, out, err));
        }
        let (Some(start), Some(end)) = (out.find(MGMT_VALUE_START), out.find(MGMT_VALUE_END))
        else {
            return Err(Error::management("Management markers missing", script, out, err));
        };
        if end < start {
            return Err(Error::management("Management markers missing", script, out, err));
        }

        // A thread or IRQ handler may have printed around the value
        let prefix = &out[..start];
        let suffix = &out[end + MGMT_VALUE_END.len()..];
        if !prefix.is_empty() {
            warn!("Eval output had unexpected prefix: {:?}", prefix);
        }
        if !suffix.is_empty() {
            warn!("Eval output had unexpected suffix: {:?}", suffix);
        }

        let value_str = &out[start + MGMT_VALUE_START.len()..end];
        serde_json::from_str(value_str).map_err(|e| {
            Error::management(
                format!("Could not parse management response: {e}"),
                script,
                out.clone(),
                err.clone(),
            )
        })
    }

    fn fetch_builtin_modules(&mut self) -> Result<Vec<String>> {
        let (out, err) =
            self.execute_and_capture_output("__pipkin_helper.builtins.help('modules')")?;
        if !err.is_empty() || out.is_empty() {
            warn!("Could not query builtin modules");
            return Ok(Vec::new());
        }
        Ok(parse_builtin_modules(&out))
    }

    fn should_hexlify(&self, path: &str) -> bool {
        let lower = path.to_lowercase();
        self.binascii.is_some() && !TEXT_SUFFIXES.iter().any(|s| lower.ends_with(s))
    }

    fn ensure_dir(&mut self, path: &str) -> Result<()> {
        if path == "/" || self.known_dirs.contains(path) {
            return Ok(());
        }
        let p = py_str(path);
        self.execute_without_output(&format!(
            "try:\n    __pipkin_helper.os.stat({p})\nexcept __pipkin_helper.builtins.OSError:\n    __pipkin_helper.os.mkdir({p})\n"
        ))?;
        self.known_dirs.insert(path.to_string());
        Ok(())
    }

    fn ensure_parent_dirs(&mut self, path: &str) -> Result<()> {
        let mut parents = Vec::new();
        let mut current = parent_path(path);
        while let Some(dir) = current {
            parents.push(dir.to_string());
            current = parent_path(dir);
        }
        for dir in parents.iter().rev() {
            self.ensure_dir(dir)?;
        }
        Ok(())
    }
}

impl<C: Connection> Target for BareMetalTarget<C> {
    fn install_dir(&self) -> &str {
        &self.install_dir
    }

    fn read_file(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        let open_script = format!(
            "__pipkin_fp = __pipkin_helper.builtins.open({}, 'rb')",
            py_str(path)
        );
        let (out, err) = self.execute_and_capture_output(&open_script)?;
        let combined = format!("{out}{err}");
        if !combined.trim().is_empty() {
            if is_missing_file_error(&combined) {
                return Ok(None);
            }
            return Err(Error::management(
                format!("Could not open file {path} for reading"),
                open_script,
                out,
                err,
            ));
        }

        let hex_module = if self.should_hexlify(path) {
            self.binascii.clone()
        } else {
            None
        };
        if let Some(module) = &hex_module {
            self.execute_without_output(&format!(
                "from {module} import hexlify as __pipkin_hexlify"
            ))?;
        }

        let mut content = Vec::new();
        loop {
            let block: Vec<u8> = if hex_module.is_some() {
                let hex_block: String = self.evaluate(&format!(
                    "__pipkin_hexlify(__pipkin_fp.read({FILE_BLOCK_SIZE})).decode()"
                ))?;
                hex::decode(hex_block.trim()).map_err(|e| {
                    Error::Communication(format!("Could not decode block of {path}: {e}"))
                })?
            } else {
                self.evaluate(&format!(
                    "__pipkin_helper.builtins.list(__pipkin_fp.read({FILE_BLOCK_SIZE}))"
                ))?
            };
            let len = block.len();
            content.extend(block);
            if len < FILE_BLOCK_SIZE {
                break;
            }
        }

        self.execute_without_output(
            "__pipkin_fp.close()\ndel __pipkin_fp\ntry:\n    del __pipkin_hexlify\nexcept:\n    pass\n",
        )?;
        debug!("Read {} ({} bytes)", path, content.len());
        Ok(Some(content))
    }

    fn write_file(&mut self, path: &str, content: &[u8]) -> Result<()> {
        self.ensure_parent_dirs(path)?;

        let (out, err) = self.execute_and_capture_output(&format!(
            "__pipkin_written = 0\n__pipkin_fp = __pipkin_helper.builtins.open({}, 'wb')\n",
            py_str(path)
        ))?;
        let combined = format!("{out}{err}");
        if combined.contains("EROFS") || combined.contains("Read-only filesystem") {
            return Err(Error::user(format!(
                "Could not write {path}: the device filesystem is read-only"
            )));
        }
        if !combined.is_empty() {
            return Err(Error::Communication(format!(
                "Could not open file {path} for writing, output:\n{combined}"
            )));
        }

        let hex_module = if self.should_hexlify(path) {
            self.binascii.clone()
        } else {
            None
        };
        let (import, payload) = match &hex_module {
            Some(module) => (
                format!("from {module} import unhexlify as __pipkin_unhex\n"),
                "__pipkin_unhex(x)",
            ),
            None => (String::new(), "x"),
        };
        self.execute_without_output(&format!(
            "{import}def __W(x):\n    global __pipkin_written\n    __pipkin_written += __pipkin_fp.write({payload})\n    __pipkin_fp.flush()\n    if __pipkin_helper.builtins.hasattr(__pipkin_helper.os, 'sync'):\n        __pipkin_helper.os.sync()\n"
        ))?;

        let mut bytes_sent = 0;
        for block in content.chunks(FILE_BLOCK_SIZE) {
            let literal = if hex_module.is_some() {
                py_bytes(hex::encode(block).as_bytes())
            } else {
                py_bytes(block)
            };
            let (out, err) = self.execute_and_capture_output(&format!("__W({literal})"))?;
            if !out.is_empty() || !err.is_empty() {
                return Err(Error::management(
                    format!(
                        "Could not write next block after having written {bytes_sent} bytes to {path}"
                    ),
                    "__W(...)",
                    out,
                    err,
                ));
            }
            bytes_sent += block.len();
        }

        let bytes_received: usize = self.evaluate("__pipkin_written")?;
        if bytes_received != bytes_sent {
            return Err(Error::Communication(format!(
                "Expected {bytes_sent} written bytes to {path} but device wrote {bytes_received}"
            )));
        }

        self.execute_without_output(
            "try:\n    del __W\n    del __pipkin_written\n    __pipkin_fp.close()\n    del __pipkin_fp\n    del __pipkin_unhex\nexcept:\n    pass\n",
        )?;
        debug!("Wrote {} ({} bytes)", path, bytes_sent);
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> Result<()> {
        let p = py_str(path);
        self.execute_without_output(&format!(
            "try:\n    __pipkin_helper.os.stat({p})\nexcept __pipkin_helper.builtins.OSError:\n    pass\nelse:\n    __pipkin_helper.os.remove({p})\n"
        ))?;
        info!("Removed file: {}", path);
        Ok(())
    }

    fn remove_dir_if_empty(&mut self, path: &str) -> Result<bool> {
        if path == "/" {
            return Ok(false);
        }
        let p = py_str(path);
        let removed: bool = self.evaluate_script(&format!(
            "try:\n    __pipkin_entries = __pipkin_helper.os.listdir({p})\nexcept __pipkin_helper.builtins.OSError:\n    __pipkin_helper.print_mgmt_value(False)\nelse:\n    if __pipkin_entries:\n        __pipkin_helper.print_mgmt_value(False)\n    else:\n        __pipkin_helper.os.rmdir({p})\n        __pipkin_helper.print_mgmt_value(True)\n    del __pipkin_entries\n"
        ))?;
        if removed {
            self.known_dirs.remove(path);
            info!("Removed directory: {}", path);
        }
        Ok(removed)
    }

    fn list_dir(&mut self, path: &str) -> Result<Option<Vec<String>>> {
        let p = py_str(path);
        self.evaluate_script(&format!(
            "try:\n    __pipkin_helper.print_mgmt_value(__pipkin_helper.builtins.sorted(__pipkin_helper.os.listdir({p})))\nexcept __pipkin_helper.builtins.OSError:\n    __pipkin_helper.print_mgmt_value(None)\n"
        ))
    }

    fn close(&mut self) -> Result<()> {
        let result = self.ensure_normal_mode();
        if let Err(e) = &result {
            warn!("Could not return to normal REPL: {}", e);
        }
        self.connection.close()?;
        result
    }
}

/// First preferred library directory present on `sys.path`, else the
/// first entry mentioning `lib`
pub fn choose_install_dir(sys_path: &[String]) -> Option<String> {
    PREFERRED_INSTALL_DIRS
        .iter()
        .find(|dir| sys_path.iter().any(|entry| entry == *dir))
        .map(|dir| dir.to_string())
        .or_else(|| sys_path.iter().find(|entry| entry.contains("lib")).cloned())
}

/// Module names from the output of `help('modules')`
fn parse_builtin_modules(out: &str) -> Vec<String> {
    let mut lines: Vec<&str> = out.trim().lines().collect();
    if let Some(last) = lines.last() {
        let last = last.trim();
        // A closing sentence like "Plus any modules on the filesystem"
        if last.contains(' ') && !last.contains("  ") && !last.contains('\t') {
            lines.pop();
        }
    }
    lines
        .join(" ")
        .replace("/__init__", "")
        .replace("__main__", "")
        .replace('/', ".")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn is_missing_file_error(output: &str) -> bool {
    ["ENOENT", "ENODEV", "[Errno 2]", "[Errno 19]"]
        .iter()
        .any(|marker| output.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    type Handler = Box<dyn FnMut(&str) -> (String, String) + Send>;

    /// Board that speaks the raw REPL framing and hands each submitted
    /// script to a handler
    struct FakeBoard {
        raw: bool,
        script: Vec<u8>,
        incoming: Vec<u8>,
        handler: Handler,
        closed: bool,
    }

    impl FakeBoard {
        fn new(handler: impl FnMut(&str) -> (String, String) + Send + 'static) -> Self {
            Self {
                raw: false,
                script: Vec::new(),
                incoming: Vec::new(),
                handler: Box::new(handler),
                closed: false,
            }
        }
    }

    impl Connection for FakeBoard {
        fn write(&mut self, data: &[u8]) -> Result<usize> {
            for &b in data {
                match b {
                    0x01 => {
                        self.raw = true;
                        self.incoming.extend_from_slice(b"\r\n");
                        self.incoming.extend_from_slice(FIRST_RAW_PROMPT);
                    }
                    0x02 => {
                        self.raw = false;
                        self.incoming.extend_from_slice(b"\r\nMicroPython v1.20.0\r\n>>> ");
                    }
                    0x03 if !self.raw => self.incoming.extend_from_slice(b"\r\n>>> "),
                    0x03 => {}
                    0x04 if self.raw => {
                        let script = String::from_utf8(std::mem::take(&mut self.script)).unwrap();
                        let (out, err) = (self.handler)(&script);
                        self.incoming.extend_from_slice(b"OK");
                        self.incoming.extend_from_slice(out.as_bytes());
                        self.incoming.push(EOT);
                        self.incoming.extend_from_slice(err.as_bytes());
                        self.incoming.extend_from_slice(RAW_PROMPT);
                    }
                    b => self.script.push(b),
                }
            }
            Ok(data.len())
        }

        fn read_until(&mut self, markers: &[&[u8]], _timeout: Duration) -> Result<Vec<u8>> {
            let end = markers
                .iter()
                .filter_map(|m| {
                    self.incoming
                        .windows(m.len())
                        .position(|w| w == *m)
                        .map(|pos| pos + m.len())
                })
                .min()
                .ok_or_else(|| Error::Communication("timed out".to_string()))?;
            Ok(self.incoming.drain(..end).collect())
        }

        fn read(&mut self, size: usize, _timeout: Duration) -> Result<Vec<u8>> {
            if self.incoming.len() < size {
                return Err(Error::Communication("timed out".to_string()));
            }
            Ok(self.incoming.drain(..size).collect())
        }

        fn read_all(&mut self) -> Vec<u8> {
            std::mem::take(&mut self.incoming)
        }

        fn set_text_mode(&mut self, _text_mode: bool) {}

        fn incoming_is_empty(&self) -> bool {
            self.incoming.is_empty()
        }

        fn outgoing_is_empty(&self) -> bool {
            true
        }

        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    fn value(json: &str) -> (String, String) {
        (format!("<pipkin>{json}</pipkin>"), String::new())
    }

    fn quiet() -> (String, String) {
        (String::new(), String::new())
    }

    /// Handler answering the connection handshake, then delegating
    fn board_with(
        modules: &'static str,
        sys_path: &'static str,
        mut rest: impl FnMut(&str) -> (String, String) + Send + 'static,
    ) -> FakeBoard {
        FakeBoard::new(move |script| {
            if script.starts_with("class __pipkin_helper") {
                quiet()
            } else if script.contains("help('modules')") {
                (modules.to_string(), String::new())
            } else if script.contains("print_mgmt_value(__pipkin_helper.sys.path)") {
                value(sys_path)
            } else {
                rest(script)
            }
        })
    }

    fn connect(board: FakeBoard) -> BareMetalTarget<FakeBoard> {
        BareMetalTarget::connect_with_delay(board, Duration::ZERO).unwrap()
    }

    const MODULES: &str = "__main__          gc                uasyncio/__init__ ubinascii\n\
                           builtins          micropython       uos               sys\n\
                           Plus any modules on the filesystem\n";

    #[test]
    fn test_choose_install_dir() {
        let path = |entries: &[&str]| entries.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(
            choose_install_dir(&path(&["", ".frozen", "/lib"])).as_deref(),
            Some("/lib")
        );
        assert_eq!(
            choose_install_dir(&path(&["", "/flash/libs", "/lib"])).as_deref(),
            Some("/flash/libs")
        );
        assert_eq!(
            choose_install_dir(&path(&["", "/sd/mylib"])).as_deref(),
            Some("/sd/mylib")
        );
        assert_eq!(choose_install_dir(&path(&["", "/flash"])), None);
    }

    #[test]
    fn test_parse_builtin_modules() {
        let modules = parse_builtin_modules(MODULES);
        assert!(modules.contains(&"ubinascii".to_string()));
        assert!(modules.contains(&"uasyncio".to_string()));
        assert!(!modules.contains(&"Plus".to_string()));
        assert!(!modules.iter().any(|m| m.contains("__main__")));
    }

    #[test]
    fn test_connect_enters_raw_mode_and_picks_install_dir() {
        let mut target = connect(board_with(MODULES, r#"["", ".frozen", "/lib"]"#, |_| quiet()));
        assert_eq!(target.install_dir(), "/lib");
        assert_eq!(target.binascii.as_deref(), Some("ubinascii"));
        assert!(target.last_prompt.is_some_and(Prompt::is_raw));

        target.close().unwrap();
        assert_eq!(target.last_prompt, Some(Prompt::Normal));
        assert!(target.connection.closed);
    }

    #[test]
    fn test_silent_board_is_communication_error() {
        struct Silent;
        impl Connection for Silent {
            fn write(&mut self, data: &[u8]) -> Result<usize> {
                Ok(data.len())
            }
            fn read_until(&mut self, _: &[&[u8]], _: Duration) -> Result<Vec<u8>> {
                Err(Error::Communication("timed out".to_string()))
            }
            fn read(&mut self, _: usize, _: Duration) -> Result<Vec<u8>> {
                Err(Error::Communication("timed out".to_string()))
            }
            fn read_all(&mut self) -> Vec<u8> {
                Vec::new()
            }
            fn set_text_mode(&mut self, _: bool) {}
            fn incoming_is_empty(&self) -> bool {
                true
            }
            fn outgoing_is_empty(&self) -> bool {
                true
            }
            fn close(&mut self) -> Result<()> {
                Ok(())
            }
        }

        let err = BareMetalTarget::connect(Silent).err().unwrap();
        assert!(err.to_string().contains("Could not get raw REPL"));
    }

    #[test]
    fn test_script_error_is_management_error() {
        let mut target = connect(board_with(MODULES, r#"["/lib"]"#, |_| {
            (
                String::new(),
                "Traceback (most recent call last):\nOSError: [Errno 5] EIO\n".to_string(),
            )
        }));
        let err = target.list_dir("/lib").unwrap_err();
        assert!(matches!(err, Error::Management { .. }));
    }

    #[test]
    fn test_write_text_file_verbatim() {
        let written = Arc::new(Mutex::new(Vec::<String>::new()));
        let scripts = Arc::clone(&written);
        let mut count = 0usize;
        let mut target = connect(board_with(MODULES, r#"["/lib"]"#, move |script| {
            scripts.lock().unwrap().push(script.to_string());
            if let Some(literal) = script.strip_prefix("__W(b'") {
                count += literal.trim_end_matches("')").len();
                quiet()
            } else if script.contains("print_mgmt_value(__pipkin_written)") {
                value(&count.to_string())
            } else {
                quiet()
            }
        }));

        target.write_file("/lib/demo/__init__.py", b"x = 1").unwrap();

        let scripts = written.lock().unwrap();
        assert!(scripts.iter().any(|s| s.contains("os.mkdir(\"/lib\")")));
        assert!(scripts.iter().any(|s| s.contains("os.mkdir(\"/lib/demo\")")));
        assert!(scripts.iter().any(|s| s == "__W(b'x = 1')"));
        assert!(!scripts.iter().any(|s| s.contains("unhexlify")));
    }

    #[test]
    fn test_write_count_mismatch_is_communication_error() {
        let mut target = connect(board_with(MODULES, r#"["/lib"]"#, |script| {
            if script.contains("print_mgmt_value(__pipkin_written)") {
                value("0")
            } else {
                quiet()
            }
        }));
        let err = target.write_file("/lib/a.py", b"abc").unwrap_err();
        assert!(err.is_communication());
    }

    #[test]
    fn test_write_binary_file_hex_encoded() {
        let blocks = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen = Arc::clone(&blocks);
        let mut target = connect(board_with(MODULES, r#"["/lib"]"#, move |script| {
            if script.starts_with("__W(") {
                seen.lock().unwrap().push(script.to_string());
                quiet()
            } else if script.contains("print_mgmt_value(__pipkin_written)") {
                value("2")
            } else {
                quiet()
            }
        }));

        target.write_file("/lib/font.bin", &[0x00, 0xff]).unwrap();
        assert_eq!(*blocks.lock().unwrap(), vec!["__W(b'00ff')".to_string()]);
    }

    #[test]
    fn test_read_file_in_blocks() {
        let data: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
        let source = data.clone();
        let mut offset = 0usize;
        let mut target = connect(board_with(MODULES, r#"["/lib"]"#, move |script| {
            if script.contains("__pipkin_fp.read(") {
                let end = (offset + FILE_BLOCK_SIZE).min(source.len());
                let block = hex::encode(&source[offset..end]);
                offset = end;
                value(&format!("\"{block}\""))
            } else {
                quiet()
            }
        }));
        assert_eq!(target.read_file("/lib/blob.bin").unwrap(), Some(data));
    }

    #[test]
    fn test_read_text_file_as_byte_list() {
        let mut target = connect(board_with(MODULES, r#"["/lib"]"#, |script| {
            if script.contains("builtins.list(__pipkin_fp.read(") {
                value("[104, 105]")
            } else {
                quiet()
            }
        }));
        assert_eq!(
            target.read_file("/lib/demo-1.0.dist-info/METADATA").unwrap(),
            Some(b"hi".to_vec())
        );
    }

    #[test]
    fn test_read_missing_file() {
        let mut target = connect(board_with(MODULES, r#"["/lib"]"#, |script| {
            if script.contains("open(") {
                (
                    String::new(),
                    "Traceback (most recent call last):\nOSError: [Errno 2] ENOENT\n".to_string(),
                )
            } else {
                quiet()
            }
        }));
        assert_eq!(target.read_file("/lib/nope.py").unwrap(), None);
    }

    #[test]
    fn test_list_and_remove_dir() {
        let fs: Arc<Mutex<BTreeMap<String, Vec<String>>>> = Arc::new(Mutex::new(BTreeMap::new()));
        fs.lock()
            .unwrap()
            .insert("/lib/pkg".to_string(), vec!["a.py".to_string()]);
        let state = Arc::clone(&fs);
        let mut target = connect(board_with(MODULES, r#"["/lib"]"#, move |script| {
            let fs = state.lock().unwrap();
            if script.contains("sorted(") {
                match fs.get("/lib/pkg") {
                    Some(entries) => value(&serde_json::to_string(entries).unwrap()),
                    None => value("null"),
                }
            } else if script.contains("__pipkin_entries") {
                value(if fs["/lib/pkg"].is_empty() { "true" } else { "false" })
            } else {
                quiet()
            }
        }));

        assert_eq!(
            target.list_dir("/lib/pkg").unwrap(),
            Some(vec!["a.py".to_string()])
        );
        assert!(!target.remove_dir_if_empty("/lib/pkg").unwrap());

        fs.lock().unwrap().get_mut("/lib/pkg").unwrap().clear();
        assert!(target.remove_dir_if_empty("/lib/pkg").unwrap());

        fs.lock().unwrap().remove("/lib/pkg");
        assert_eq!(target.list_dir("/lib/pkg").unwrap(), None);
    }
}
