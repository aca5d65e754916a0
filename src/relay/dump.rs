//! Payload dump for per-chunk diagnostics

const LINE_WIDTH: usize = 16;

/// Render bytes as a hex dump: offset, sixteen hex bytes split after the
/// eighth, then the printable characters between bars.
pub fn hex_dump(data: &[u8]) -> String {
    let mut output = String::with_capacity((data.len() / LINE_WIDTH + 1) * 79);

    for (line, chunk) in data.chunks(LINE_WIDTH).enumerate() {
        output.push_str(&format!("{:08x}  ", line * LINE_WIDTH));

        for i in 0..LINE_WIDTH {
            match chunk.get(i) {
                Some(byte) => output.push_str(&format!("{:02x} ", byte)),
                None => output.push_str("   "),
            }
            if i == 7 {
                output.push(' ');
            }
        }

        output.push_str(" |");
        output.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        output.push_str("|\n");
    }

    output
}
