/// Decodes a configured preamble string, expanding C-style escapes
/// (`\n`, `\r`, `\t`, `\\`, `\xNN` hex, and `\NNN` octal) into the raw bytes
/// sent immediately after a TCP connection is established — used by devices
/// that expect a login banner or mode-select string before they start
/// streaming.
#[must_use]
pub fn decode(spec: &str) -> Vec<u8> {
    let bytes = spec.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        match bytes[i + 1] {
            b'n' => {
                out.push(b'\n');
                i += 2;
            }
            b'r' => {
                out.push(b'\r');
                i += 2;
            }
            b't' => {
                out.push(b'\t');
                i += 2;
            }
            b'\\' => {
                out.push(b'\\');
                i += 2;
            }
            b'x' => {
                let hex: String = bytes[i + 2..]
                    .iter()
                    .take(2)
                    .take_while(|b| b.is_ascii_hexdigit())
                    .map(|&b| b as char)
                    .collect();
                if hex.is_empty() {
                    out.push(b'\\');
                    i += 1;
                } else {
                    out.push(u8::from_str_radix(&hex, 16).unwrap_or(0));
                    i += 2 + hex.len();
                }
            }
            b'0'..=b'7' => {
                let oct: String = bytes[i + 1..]
                    .iter()
                    .take(3)
                    .take_while(|b| (b'0'..=b'7').contains(b))
                    .map(|&b| b as char)
                    .collect();
                out.push(u8::from_str_radix(&oct, 8).unwrap_or(0));
                i += 1 + oct.len();
            }
            other => {
                out.push(other);
                i += 2;
            }
        }
    }
    out
}
