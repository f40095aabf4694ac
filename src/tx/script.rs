//! Data-carrier script encoding.

pub const OP_FALSE: u8 = 0x00;
pub const OP_RETURN: u8 = 0x6a;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;

/// Append a minimal push of `data`. Empty data pushes `OP_0`.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len == 0 {
        script.push(OP_FALSE);
        return;
    }
    if len < OP_PUSHDATA1 as usize {
        script.push(len as u8);
    } else if len <= 0xff {
        script.push(OP_PUSHDATA1);
        script.push(len as u8);
    } else if len <= 0xffff {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        script.push(OP_PUSHDATA4);
        script.extend_from_slice(&(len as u32).to_le_bytes());
    }
    script.extend_from_slice(data);
}

/// Build an unspendable `OP_FALSE OP_RETURN <push>...` script.
pub fn safe_data_out<I, T>(fields: I) -> Vec<u8>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut script = vec![OP_FALSE, OP_RETURN];
    for field in fields {
        push_data(&mut script, field.as_ref());
    }
    script
}

/// Extract the pushes following `OP_RETURN` (with or without a leading
/// `OP_FALSE`). Returns `None` for scripts that are not data carriers or
/// contain non-push opcodes after `OP_RETURN`.
pub fn data_pushes(script: &[u8]) -> Option<Vec<Vec<u8>>> {
    let body = match script {
        [OP_FALSE, OP_RETURN, rest @ ..] => rest,
        [OP_RETURN, rest @ ..] => rest,
        _ => return None,
    };

    let mut pushes = Vec::new();
    let mut pos = 0;
    while pos < body.len() {
        let op = body[pos];
        pos += 1;
        let len = match op {
            OP_FALSE => 0,
            1..=0x4b => op as usize,
            OP_PUSHDATA1 => {
                let n = *body.get(pos)? as usize;
                pos += 1;
                n
            }
            OP_PUSHDATA2 => {
                let raw = body.get(pos..pos + 2)?;
                pos += 2;
                u16::from_le_bytes([raw[0], raw[1]]) as usize
            }
            OP_PUSHDATA4 => {
                let raw = body.get(pos..pos + 4)?;
                pos += 4;
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize
            }
            _ => return None,
        };
        pushes.push(body.get(pos..pos + len)?.to_vec());
        pos += len;
    }
    Some(pushes)
}
