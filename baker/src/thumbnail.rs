use std::io::Cursor;

use common::TriMesh;
use glam::{Mat3, Vec2, Vec3};
use image::{ImageFormat, Rgb, RgbImage};

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Nothing to render, the scene has no triangles")]
    EmptyScene,
    #[error("Invalid resolution {0}x{1}")]
    Resolution(u32, u32),
    #[error("Failed to encode PNG: {0}")]
    Encode(#[from] image::ImageError),
}

/// Turns a scene into PNG bytes.
pub trait Render {
    fn render(&self, mesh: &TriMesh, resolution: (u32, u32)) -> Result<Vec<u8>, RenderError>;
}

/// Flat shaded z-buffered rasterizer with a fixed three-quarter view.
pub struct SoftwareRenderer {
    pub background: [u8; 3],
    pub base_colour: Vec3,
    /// Share of the smaller image side kept clear around the model.
    pub margin: f32,
}

impl Default for SoftwareRenderer {
    fn default() -> Self {
        Self {
            background: [240, 240, 240],
            base_colour: Vec3::new(0.62, 0.64, 0.70),
            margin: 0.1,
        }
    }
}

/// Tilt down 30 degrees, then turn 45 degrees around the vertical.
fn view_rotation() -> Mat3 {
    Mat3::from_rotation_y(45f32.to_radians()) * Mat3::from_rotation_x(-30f32.to_radians())
}

impl Render for SoftwareRenderer {
    fn render(&self, mesh: &TriMesh, (width, height): (u32, u32)) -> Result<Vec<u8>, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::Resolution(width, height));
        }
        if mesh.is_empty() {
            return Err(RenderError::EmptyScene);
        }

        let rotation = view_rotation();
        let rotated: Vec<Vec3> = mesh
            .verts
            .iter()
            .map(|&v| rotation * Vec3::from(v))
            .collect();

        let (min, max) = rotated.iter().fold(
            (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
            |(min, max), &v| (min.min(v), max.max(v)),
        );
        let extent = (max - min).truncate().max(Vec2::splat(f32::EPSILON));
        let centre = (min + max).truncate() * 0.5;

        let pad = width.min(height) as f32 * self.margin;
        let usable = (Vec2::new(width as f32, height as f32) - 2.0 * pad).max(Vec2::ONE);
        // Uniform scale so the model keeps its aspect ratio
        let scale = (usable / extent).min_element();
        let screen_centre = Vec2::new(width as f32, height as f32) * 0.5;

        let project = |v: Vec3| -> Vec3 {
            let xy = (v.truncate() - centre) * scale;
            // Image y grows downwards
            Vec3::new(screen_centre.x + xy.x, screen_centre.y - xy.y, v.z)
        };

        let light = Vec3::new(0.4, 0.8, 0.6).normalize();
        let mut image = RgbImage::from_pixel(width, height, Rgb(self.background));
        let mut depth = vec![f32::MIN; (width * height) as usize];

        for tri in mesh.indices.chunks_exact(3) {
            let [a, b, c] = [
                rotated[tri[0] as usize],
                rotated[tri[1] as usize],
                rotated[tri[2] as usize],
            ];

            let normal = (b - a).cross(c - a).normalize_or_zero();
            if normal == Vec3::ZERO {
                continue;
            }
            // Two sided lighting, scanned meshes rarely have consistent winding
            let shade = 0.25 + 0.75 * normal.dot(light).abs();
            let colour = (self.base_colour * shade * 255.0).clamp(Vec3::ZERO, Vec3::splat(255.0));
            let pixel = Rgb([colour.x as u8, colour.y as u8, colour.z as u8]);

            rasterize(
                [project(a), project(b), project(c)],
                (width, height),
                |x, y, z| {
                    let slot = &mut depth[(y * width + x) as usize];
                    // +z points at the viewer
                    if z > *slot {
                        *slot = z;
                        image.put_pixel(x, y, pixel);
                    }
                },
            );
        }

        encode_png(&image)
    }
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b - a).perp_dot(p - a)
}

fn rasterize(tri: [Vec3; 3], (width, height): (u32, u32), mut plot: impl FnMut(u32, u32, f32)) {
    let [a, b, c] = tri.map(|v| v.truncate());
    let area = edge(a, b, c);
    if area.abs() < f32::EPSILON {
        return;
    }

    let min = a.min(b).min(c).floor().max(Vec2::ZERO);
    let max = a
        .max(b)
        .max(c)
        .ceil()
        .min(Vec2::new(width as f32 - 1.0, height as f32 - 1.0));
    if min.x > max.x || min.y > max.y {
        return;
    }

    for y in min.y as u32..=max.y as u32 {
        for x in min.x as u32..=max.x as u32 {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(b, c, p) / area;
            let w1 = edge(c, a, p) / area;
            let w2 = edge(a, b, p) / area;
            if w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0 {
                plot(x, y, w0 * tri[0].z + w1 * tri[1].z + w2 * tri[2].z);
            }
        }
    }
}

fn encode_png(image: &RgbImage) -> Result<Vec<u8>, RenderError> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}

/// Wireframe cube on a plain background, used when a model cannot be drawn.
pub fn placeholder(
    (width, height): (u32, u32),
    background: [u8; 3],
) -> Result<Vec<u8>, RenderError> {
    if width == 0 || height == 0 {
        return Err(RenderError::Resolution(width, height));
    }
    let mut image = RgbImage::from_pixel(width, height, Rgb(background));

    let centre = Vec2::new(width as f32, height as f32) * 0.5;
    let half = width.min(height) as f32 / 6.0;
    let offset = Vec2::new(half / 2.0, -half / 2.0);

    let front = [
        centre + Vec2::new(-half, -half),
        centre + Vec2::new(half, -half),
        centre + Vec2::new(half, half),
        centre + Vec2::new(-half, half),
    ];
    let back = front.map(|p| p + offset);

    for i in 0..4 {
        let j = (i + 1) % 4;
        draw_line(&mut image, back[i], back[j], Rgb([180, 180, 200]));
        draw_line(&mut image, front[i], back[i], Rgb([180, 180, 200]));
    }
    for i in 0..4 {
        draw_line(&mut image, front[i], front[(i + 1) % 4], Rgb([100, 100, 150]));
    }

    encode_png(&image)
}

fn draw_line(image: &mut RgbImage, from: Vec2, to: Vec2, colour: Rgb<u8>) {
    let steps = (to - from).abs().max_element().ceil().max(1.0) as u32;
    for s in 0..=steps {
        let p = from.lerp(to, s as f32 / steps as f32).round();
        if p.x >= 0.0 && p.y >= 0.0 && (p.x as u32) < image.width() && (p.y as u32) < image.height()
        {
            image.put_pixel(p.x as u32, p.y as u32, colour);
        }
    }
}

pub fn thumbnail_file_name(base_name: &str) -> String {
    format!("{base_name}_thumbnail.png")
}
