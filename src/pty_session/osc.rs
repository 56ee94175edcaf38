use crate::log_debug;
use std::mem;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use super::io::write_all;

const FALLBACK_SIZE: (u16, u16) = (24, 80);
/// A reply the program is not reading within this window is dropped; the reader thread
/// must keep draining output.
const REPLY_WRITE_BUDGET: Duration = Duration::from_millis(100);

/// Line editors probe the terminal (cursor position, device attributes) and stall until
/// they hear back. Answer those probes on `master_fd` and drop them from the stream;
/// every other byte, escape sequences included, is left for the output classifier.
pub(super) fn respond_to_terminal_queries(buffer: &mut Vec<u8>, master_fd: RawFd) {
    let mut size: Option<(u16, u16)> = None;
    let mut idx = 0;
    while idx < buffer.len() {
        if buffer[idx] != 0x1B {
            idx += 1;
            continue;
        }
        if idx + 1 >= buffer.len() {
            break;
        }
        if buffer[idx + 1] != b'[' {
            idx += 1;
            continue;
        }
        let Some((params_end, final_byte)) = find_csi_sequence(buffer, idx + 2) else {
            break;
        };
        let seq_end = params_end + 1;
        let params: Vec<u8> = buffer.get(idx + 2..params_end).unwrap_or(&[]).to_vec();
        let (rows, cols) = *size.get_or_insert_with(|| current_terminal_size(master_fd));
        match csi_reply(&params, final_byte, rows, cols) {
            Some(reply) => {
                buffer.drain(idx..seq_end);
                if let Err(err) = write_all(
                    master_fd,
                    &reply,
                    Instant::now() + REPLY_WRITE_BUDGET,
                    &|| true,
                ) {
                    log_debug(&format!(
                        "dropped terminal query reply (CSI {}{}): {err}",
                        String::from_utf8_lossy(&params),
                        final_byte as char
                    ));
                }
            }
            None => idx = seq_end,
        }
    }
}

pub(super) fn csi_reply(params: &[u8], final_b: u8, rows: u16, cols: u16) -> Option<Vec<u8>> {
    // A leading '?' or '>' only selects the private variant; the reply is the same.
    let p: Vec<u8> = params
        .iter()
        .copied()
        .filter(|b| *b != b' ')
        .skip_while(|b| *b == b'?' || *b == b'>')
        .collect();

    match final_b {
        // DSR: status report
        b'n' if p == b"5" => Some(b"\x1b[0n".to_vec()),
        // DSR: cursor position; park the cursor at the bottom-right corner
        b'n' if p == b"6" => {
            let (r, c) = (rows.max(1), cols.max(1));
            Some(format!("\x1b[{r};{c}R").into_bytes())
        }
        // DA: primary device attributes
        b'c' if p.is_empty() || p == b"0" || p.starts_with(b"1;") => Some(b"\x1b[?1;2c".to_vec()),
        _ => None,
    }
}

pub(super) fn current_terminal_size(master_fd: RawFd) -> (u16, u16) {
    // SAFETY: libc::winsize is a plain C struct; zeroed is a valid baseline.
    let mut ws: libc::winsize = unsafe { mem::zeroed() };
    // SAFETY: ioctl only writes into ws; an invalid fd just fails.
    let ok = unsafe { libc::ioctl(master_fd, libc::TIOCGWINSZ, &mut ws) } == 0;
    if ok && ws.ws_row > 0 && ws.ws_col > 0 {
        (ws.ws_row, ws.ws_col)
    } else {
        FALLBACK_SIZE
    }
}

pub(super) fn find_csi_sequence(bytes: &[u8], start: usize) -> Option<(usize, u8)> {
    bytes
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, byte)| (0x40..=0x7E).contains(*byte))
        .map(|(idx, byte)| (idx, *byte))
}
