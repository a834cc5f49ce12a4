// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Hook-safe diagnostic lines on stderr
//!
//! Messages are rendered into a stack buffer and written with a direct
//! `libc::write`, bypassing std's buffered and locked stderr. Nothing here
//! allocates, and write failures are ignored.

use core::fmt::{self, Write};

use crate::error::InterceptError;

const LINE_CAPACITY: usize = 512;
const PREFIX: &str = "[ah-exec-intercept]";

/// Fixed-size line that silently truncates and always ends with a newline.
pub(crate) struct LineBuffer {
    bytes: [u8; LINE_CAPACITY],
    len: usize,
}

impl LineBuffer {
    pub(crate) const fn new() -> Self {
        Self {
            bytes: [0; LINE_CAPACITY],
            len: 0,
        }
    }

    /// The rendered line, newline included.
    pub(crate) fn finish(&mut self) -> &[u8] {
        if self.len == LINE_CAPACITY {
            self.bytes[LINE_CAPACITY - 1] = b'\n';
        } else {
            self.bytes[self.len] = b'\n';
            self.len += 1;
        }
        &self.bytes[..self.len]
    }
}

impl Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = LINE_CAPACITY - self.len;
        let take = s.len().min(room);
        self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        // Never report an error: a failing writer would cut the line short
        // instead of truncating it.
        Ok(())
    }
}

pub(crate) fn render(line: &mut LineBuffer, pid: libc::pid_t, message: fmt::Arguments<'_>) {
    let _ = write!(line, "{PREFIX} {pid}: {message}");
}

/// Writes one `[ah-exec-intercept] <pid>: <message>` line to stderr.
pub fn emit(message: fmt::Arguments<'_>) {
    let mut line = LineBuffer::new();
    render(&mut line, unsafe { libc::getpid() }, message);
    write_stderr(line.finish());
}

/// Reports `error` (when verbose) and aborts the process.
pub fn fatal(verbose: bool, error: &InterceptError) -> ! {
    if verbose {
        emit(format_args!("fatal: {error}"));
    }
    std::process::abort()
}

fn write_stderr(mut buf: &[u8]) {
    while !buf.is_empty() {
        let result = unsafe {
            libc::write(
                libc::STDERR_FILENO,
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
            )
        };
        if result > 0 {
            buf = &buf[result as usize..];
        } else if result < 0
            && std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR)
        {
            continue;
        } else {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(pid: libc::pid_t, message: fmt::Arguments<'_>) -> Vec<u8> {
        let mut line = LineBuffer::new();
        render(&mut line, pid, message);
        line.finish().to_vec()
    }

    #[test]
    fn lines_carry_prefix_and_pid() {
        assert_eq!(
            rendered(4242, format_args!("{}", "execve")),
            b"[ah-exec-intercept] 4242: execve\n".to_vec()
        );
    }

    #[test]
    fn errors_render_through_display() {
        let error = InterceptError::SymbolNotFound { symbol: "execvpe" };
        assert_eq!(
            rendered(1, format_args!("fatal: {error}")),
            b"[ah-exec-intercept] 1: fatal: unable to find underlying function for execvpe\n"
                .to_vec()
        );
    }

    #[test]
    fn long_lines_are_truncated_and_terminated() {
        let long = "x".repeat(2 * LINE_CAPACITY);
        let line = rendered(7, format_args!("{long}"));

        assert_eq!(line.len(), LINE_CAPACITY);
        assert!(line.starts_with(b"[ah-exec-intercept] 7: xxx"));
        assert_eq!(line.last(), Some(&b'\n'));
    }
}
