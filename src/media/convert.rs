//! Pixel-Konvertierung für den Video-Pfad
//!
//! Kameras liefern planares YUV 4:2:0 mit gerätespezifischen Strides.
//! Hier wird daraus ein einzelner Puffer: volle Luma-Ebene gefolgt von
//! verschränktem Chroma (V zuerst). Die Strides pro Ebene sind getrennt zu
//! behandeln, sonst verschieben sich die Farben.

use super::camera::PlanarFrame;
use super::MediaError;

/// Anzahl erwarteter Ebenen (Y, U, V)
const PLANES: usize = 3;

/// Konvertiert einen planaren Frame in Luma + verschränktes Chroma
///
/// Ergebnis-Layout: `width*height` Luma-Bytes, danach pro 2x2-Block je ein
/// V- und ein U-Byte (Chroma-Breite `(width+1)/2`).
pub fn planar_to_interleaved(frame: &PlanarFrame) -> Result<Vec<u8>, MediaError> {
    if frame.planes.len() != PLANES {
        return Err(MediaError::UnsupportedFrame(format!(
            "expected {} planes, got {}",
            PLANES,
            frame.planes.len()
        )));
    }

    let width = frame.width as usize;
    let height = frame.height as usize;
    let chroma_width = width.div_ceil(2);
    let chroma_height = height.div_ceil(2);

    let y_plane = &frame.planes[0];
    let u_plane = &frame.planes[1];
    let v_plane = &frame.planes[2];

    let mut out = Vec::with_capacity(width * height + 2 * chroma_width * chroma_height);

    // Luma zeilenweise, Zeilen-Padding überspringen
    for row in 0..height {
        let base = row * y_plane.row_stride;
        for col in 0..width {
            let idx = base + col * y_plane.pixel_stride;
            let byte = y_plane
                .bytes
                .get(idx)
                .copied()
                .ok_or_else(|| short_plane("luma", idx, y_plane.bytes.len()))?;
            out.push(byte);
        }
    }

    // Chroma verschränkt, V vor U
    for row in 0..chroma_height {
        let u_base = row * u_plane.row_stride;
        let v_base = row * v_plane.row_stride;
        for col in 0..chroma_width {
            let v_idx = v_base + col * v_plane.pixel_stride;
            let u_idx = u_base + col * u_plane.pixel_stride;
            let v = v_plane
                .bytes
                .get(v_idx)
                .copied()
                .ok_or_else(|| short_plane("chroma-v", v_idx, v_plane.bytes.len()))?;
            let u = u_plane
                .bytes
                .get(u_idx)
                .copied()
                .ok_or_else(|| short_plane("chroma-u", u_idx, u_plane.bytes.len()))?;
            out.push(v);
            out.push(u);
        }
    }

    Ok(out)
}

fn short_plane(plane: &str, idx: usize, len: usize) -> MediaError {
    MediaError::UnsupportedFrame(format!(
        "{plane} plane too short: index {idx}, length {len}"
    ))
}

/// Konvertiert Luma + verschränktes Chroma nach RGB8
///
/// BT.601-Näherung in Festkomma-Arithmetik; Eingabe-Layout wie von
/// [`planar_to_interleaved`] erzeugt.
pub fn interleaved_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, MediaError> {
    let width = width as usize;
    let height = height as usize;
    let chroma_width = width.div_ceil(2);
    let luma_len = width * height;
    let expected = luma_len + 2 * chroma_width * height.div_ceil(2);

    if data.len() < expected {
        return Err(MediaError::UnsupportedFrame(format!(
            "interleaved buffer too short: {} < {}",
            data.len(),
            expected
        )));
    }

    let mut rgb = Vec::with_capacity(luma_len * 3);

    for row in 0..height {
        let chroma_base = luma_len + (row / 2) * chroma_width * 2;
        for col in 0..width {
            let y = data[row * width + col] as i32;
            let chroma_idx = chroma_base + (col / 2) * 2;
            let v = data[chroma_idx] as i32 - 128;
            let u = data[chroma_idx + 1] as i32 - 128;

            let r = y + ((359 * v) >> 8);
            let g = y - ((88 * u + 183 * v) >> 8);
            let b = y + ((454 * u) >> 8);

            rgb.push(r.clamp(0, 255) as u8);
            rgb.push(g.clamp(0, 255) as u8);
            rgb.push(b.clamp(0, 255) as u8);
        }
    }

    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::camera::FramePlane;

    /// 4x2-Frame mit Zeilen-Padding auf der Luma-Ebene und
    /// pixel_stride 2 auf den Chroma-Ebenen
    fn strided_frame() -> PlanarFrame {
        // Luma 4x2, row_stride 6 (2 Byte Padding pro Zeile)
        let luma = vec![
            1, 2, 3, 4, 255, 255, //
            5, 6, 7, 8, 255, 255,
        ];
        // Chroma je 2x1 Nutzwerte, pixel_stride 2 (verschränkte Quelle)
        let u = vec![10, 0, 11, 0];
        let v = vec![20, 0, 21, 0];

        PlanarFrame {
            width: 4,
            height: 2,
            planes: vec![
                FramePlane {
                    bytes: luma,
                    row_stride: 6,
                    pixel_stride: 1,
                },
                FramePlane {
                    bytes: u,
                    row_stride: 4,
                    pixel_stride: 2,
                },
                FramePlane {
                    bytes: v,
                    row_stride: 4,
                    pixel_stride: 2,
                },
            ],
        }
    }

    #[test]
    fn test_strided_planes_convert_correctly() {
        let out = planar_to_interleaved(&strided_frame()).unwrap();

        // Luma ohne Padding, danach V/U-Paare
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 20, 10, 21, 11]);
    }

    #[test]
    fn test_wrong_plane_count_rejected() {
        let mut frame = strided_frame();
        frame.planes.pop();
        assert!(planar_to_interleaved(&frame).is_err());
    }

    #[test]
    fn test_truncated_plane_rejected() {
        let mut frame = strided_frame();
        frame.planes[0].bytes.truncate(3);
        assert!(planar_to_interleaved(&frame).is_err());
    }

    #[test]
    fn test_neutral_chroma_stays_gray() {
        // 2x2 mit Y=128 und neutralem Chroma ergibt reines Grau
        let data = vec![128, 128, 128, 128, 128, 128];
        let rgb = interleaved_to_rgb(&data, 2, 2).unwrap();

        assert_eq!(rgb.len(), 12);
        for px in rgb {
            assert_eq!(px, 128);
        }
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(interleaved_to_rgb(&[0, 0, 0], 2, 2).is_err());
    }
}
