//! Kernel log assertions.

use std::process::Command;

/// Whether `msgs` appear, in order, as line suffixes of `log`.
///
/// Each message is searched for starting at the line that matched the
/// previous one, so repeated messages may match the same line.
pub fn dmesg_contains(log: &[u8], msgs: &[&[u8]]) -> bool {
    let lines: Vec<&[u8]> = log.split(|b| *b == b'\n').collect();
    let mut rest: &[&[u8]] = &lines;
    for msg in msgs {
        match rest.iter().position(|line| line.ends_with(msg)) {
            Some(pos) => rest = &rest[pos..],
            None => return false,
        }
    }
    true
}

/// Assert that the kernel log contains `msgs` in order.
///
/// Panics when `dmesg` cannot be read or a message is missing.
pub fn assert_dmesg_contains(msgs: &[&[u8]]) {
    let output = Command::new("dmesg")
        .output()
        .expect("failed to run dmesg");
    assert!(output.status.success(), "dmesg exited with {}", output.status);
    assert!(
        dmesg_contains(&output.stdout, msgs),
        "kernel log does not contain {:?} in order",
        msgs.iter()
            .map(|m| String::from_utf8_lossy(m).into_owned())
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &[u8] = b"[    1.000] boot\n\
[   12.345] Single element printk\n\
[   12.346] \n\
[   12.347] printk with 2 parameters!\n";

    #[test]
    fn test_messages_in_order() {
        assert!(dmesg_contains(
            LOG,
            &[b"Single element printk", b"", b"printk with 2 parameters!"]
        ));
    }

    #[test]
    fn test_out_of_order_fails() {
        assert!(!dmesg_contains(
            LOG,
            &[b"printk with 2 parameters!", b"Single element printk"]
        ));
    }

    #[test]
    fn test_missing_message_fails() {
        assert!(!dmesg_contains(LOG, &[b"never logged"]));
        assert!(dmesg_contains(LOG, &[]));
    }
}
