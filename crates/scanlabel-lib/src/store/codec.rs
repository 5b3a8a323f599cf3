use crate::scan::{FeatureRow, FEATURE_WIDTH};

/// Bytes in one persisted label.
pub const LABEL_BYTES: u64 = 4;
/// Bytes in one persisted feature row.
pub const ROW_BYTES: u64 = (FEATURE_WIDTH * 8) as u64;

pub fn encode_features(rows: &[FeatureRow]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rows.len() * ROW_BYTES as usize);
    for row in rows {
        for value in row {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}

pub fn decode_features(bytes: &[u8]) -> Vec<FeatureRow> {
    bytes
        .chunks_exact(ROW_BYTES as usize)
        .map(|chunk| {
            let mut row = [0.0; FEATURE_WIDTH];
            for (value, raw) in row.iter_mut().zip(chunk.chunks_exact(8)) {
                *value = f64::from_le_bytes([
                    raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
                ]);
            }
            row
        })
        .collect()
}

pub fn encode_labels(labels: &[i32]) -> Vec<u8> {
    labels.iter().flat_map(|l| l.to_le_bytes()).collect()
}

pub fn decode_labels(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(LABEL_BYTES as usize)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_layout_is_row_major_little_endian() {
        let mut row = [0.0; FEATURE_WIDTH];
        row[0] = 1.0;
        row[9] = -2.5;
        let bytes = encode_features(&[row]);
        assert_eq!(bytes.len() as u64, ROW_BYTES);
        assert_eq!(&bytes[..8], &1.0f64.to_le_bytes());
        assert_eq!(&bytes[72..], &(-2.5f64).to_le_bytes());
        assert_eq!(decode_features(&bytes), vec![row]);
    }

    #[test]
    fn labels_are_four_bytes_each() {
        let bytes = encode_labels(&[1, 0, 1]);
        assert_eq!(bytes, vec![1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0]);
    }
}
