//! Video frame types and plane geometry.

use bytemuck::{Pod, Zeroable};

/// Pixel layouts a [`VideoFrame`] can carry.
///
/// The GPU path only uploads RGBA; RGB shows up when a backdrop still is
/// decoded without an alpha channel and is expanded on upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit RGB, 3 bytes per pixel.
    Rgb,
    /// 8-bit RGBA, 4 bytes per pixel.
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

/// One decoded image: a video frame, a backdrop still, or a readback of the
/// composite.
///
/// `data` holds packed rows, top row first. `timestamp_us` is the
/// presentation time within the stream, for sources that have one.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp_us: Option<u64>,
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// A zeroed frame of the given size and format.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let size = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            timestamp_us: None,
            data: vec![0; size],
        }
    }

    /// Wraps existing pixel data. The frame carries no timestamp.
    pub fn from_data(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            timestamp_us: None,
            data,
        }
    }

    /// The frame re-encoded as RGBA, with missing alpha filled in opaque.
    pub fn to_rgba(&self) -> VideoFrame {
        if self.format == PixelFormat::Rgba {
            return self.clone();
        }

        let mut rgba = vec![0u8; self.width as usize * self.height as usize * 4];
        for (dst, src) in rgba.chunks_exact_mut(4).zip(self.data.chunks_exact(3)) {
            dst[..3].copy_from_slice(src);
            dst[3] = 255;
        }

        VideoFrame {
            width: self.width,
            height: self.height,
            format: PixelFormat::Rgba,
            timestamp_us: self.timestamp_us,
            data: rgba,
        }
    }
}

/// Vertex for the unit billboard plane.
///
/// The plane spans [-0.5, 0.5] in local x/y with the normal on +z; world
/// size and orientation come from the per-plane model matrix. Texture
/// coordinates put (0, 0) at the top-left corner and (1, 1) at the
/// bottom-right, matching top-row-first frame uploads.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct PlaneVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl PlaneVertex {
    /// Vertices for the unit plane: top-left, top-right, bottom-right,
    /// bottom-left.
    pub const VERTICES: &'static [PlaneVertex] = &[
        PlaneVertex {
            position: [-0.5, 0.5, 0.0],
            normal: [0.0, 0.0, 1.0],
            uv: [0.0, 0.0],
        },
        PlaneVertex {
            position: [0.5, 0.5, 0.0],
            normal: [0.0, 0.0, 1.0],
            uv: [1.0, 0.0],
        },
        PlaneVertex {
            position: [0.5, -0.5, 0.0],
            normal: [0.0, 0.0, 1.0],
            uv: [1.0, 1.0],
        },
        PlaneVertex {
            position: [-0.5, -0.5, 0.0],
            normal: [0.0, 0.0, 1.0],
            uv: [0.0, 1.0],
        },
    ];

    /// Indices for the plane (two triangles, counter-clockwise seen from +z).
    pub const INDICES: &'static [u16] = &[0, 3, 2, 2, 1, 0];

    /// Buffer layout matching the vertex shader's three inputs.
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<PlaneVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 6]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_rgba_conversion() {
        let rgb_data = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];
        let frame = VideoFrame::from_data(2, 2, PixelFormat::Rgb, rgb_data);
        let rgba_frame = frame.to_rgba();

        assert_eq!(rgba_frame.format, PixelFormat::Rgba);
        assert_eq!(rgba_frame.data.len(), 16);
        // Check first pixel (red)
        assert_eq!(&rgba_frame.data[0..4], &[255, 0, 0, 255]);
        // Check second pixel (green)
        assert_eq!(&rgba_frame.data[4..8], &[0, 255, 0, 255]);
    }

    #[test]
    fn test_plane_uv_corners() {
        // (1, 1) must address the bottom-right corner of an uploaded frame:
        // the keying reference sample depends on it.
        let bottom_right = PlaneVertex::VERTICES
            .iter()
            .find(|v| v.uv == [1.0, 1.0])
            .unwrap();
        assert_eq!(bottom_right.position, [0.5, -0.5, 0.0]);

        let top_left = PlaneVertex::VERTICES
            .iter()
            .find(|v| v.uv == [0.0, 0.0])
            .unwrap();
        assert_eq!(top_left.position, [-0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_plane_indices_cover_all_vertices() {
        assert_eq!(PlaneVertex::INDICES.len(), 6);
        for i in 0..PlaneVertex::VERTICES.len() as u16 {
            assert!(PlaneVertex::INDICES.contains(&i));
        }
    }
}
