//! Conversion of the maildir staging tree into a single mbox container.
//!
//! Runs only when a job requests the single-file storage format. Messages are
//! drained folder by folder into the container, each tagged with its source
//! folder via an `X-Liberation-Folder` header, then the emptied folders and
//! finally the whole staging tree are removed. The container is held under an
//! exclusive advisory lock for the duration.
//!
//! There is no mid-conversion resume: a crash here leaves an inconsistent
//! intermediate state and the job is failed as a whole.

use crate::maildir::WorkingMailbox;
use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Drain `mailbox` into an mbox file at `dest`, then delete the staging tree.
pub fn convert(mailbox: &WorkingMailbox, dest: &Path) -> io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dest)?;
    file.lock_exclusive()?;

    let result = drain_into(mailbox, &file);

    // Unlock before propagating so a failed conversion never leaves the
    // container locked behind a dead job row.
    let unlock = FileExt::unlock(&file);
    result?;
    unlock?;
    Ok(())
}

fn drain_into(mailbox: &WorkingMailbox, file: &fs::File) -> io::Result<()> {
    let mut out = BufWriter::new(file);

    for folder in mailbox.folders()? {
        for message_path in mailbox.messages(&folder)? {
            let raw = fs::read(&message_path)?;
            append_message(&mut out, &folder, &raw)?;
            fs::remove_file(&message_path)?;
        }
        mailbox.remove_folder(&folder)?;
    }

    out.flush()?;
    drop(out);

    fs::remove_dir_all(mailbox.root())?;
    Ok(())
}

/// Write one message in mbox form: separator line, folder tag, headers,
/// blank line, `From `-stuffed body, trailing blank line.
fn append_message<W: Write>(out: &mut W, folder: &str, raw: &[u8]) -> io::Result<()> {
    let date = Utc::now().format("%a %b %e %H:%M:%S %Y");
    writeln!(out, "From MAILER-DAEMON {date}")?;
    writeln!(out, "X-Liberation-Folder: {folder}")?;

    let (headers, body) = split_message(raw);
    for line in lines(headers) {
        out.write_all(line)?;
        out.write_all(b"\n")?;
    }
    writeln!(out)?;

    for line in lines(body) {
        if line.starts_with(b"From ") {
            out.write_all(b">")?;
        }
        out.write_all(line)?;
        out.write_all(b"\n")?;
    }
    writeln!(out)?;
    Ok(())
}

/// Split a raw message at the first blank line into (headers, body).
fn split_message(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find(raw, b"\r\n\r\n") {
        (&raw[..pos], &raw[pos + 4..])
    } else if let Some(pos) = find(raw, b"\n\n") {
        (&raw[..pos], &raw[pos + 2..])
    } else {
        (raw, &[])
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Lines with any `\r\n` or `\n` ending stripped. Interior blank lines are
/// kept; only the empty slice after a final newline is dropped.
fn lines(data: &[u8]) -> Vec<&[u8]> {
    let mut out: Vec<&[u8]> = data
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .collect();
    if data.last() == Some(&b'\n') {
        out.pop();
    }
    out
}
