//! Vertex data for the two magnifier shapes.
//!
//! Position and texture coordinate live in one interleaved `Vertex`, so a
//! shape change always swaps both together.

use bytemuck::{Pod, Zeroable};

use crate::config::Shape;

/// Perimeter segments of the circle fan.
pub const CIRCLE_SEGMENTS: u32 = 64;

/// Fewest segments that still read as a circle at typical output sizes.
pub const MIN_CIRCLE_SEGMENTS: u32 = 32;

/// One vertex in clip space with its texture coordinate.
///
/// Texture space has its origin at the top-left, so `v` runs opposite to
/// clip-space `y`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    const fn new(x: f32, y: f32, u: f32, v: f32) -> Self {
        Self {
            position: [x, y],
            tex_coord: [u, v],
        }
    }
}

/// Primitive assembly for a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    TriangleStrip,
    /// First vertex is the hub; wgpu has no fan topology, so backends
    /// expand it with `fan_indices`.
    TriangleFan,
}

/// Immutable vertex set for one shape. Rebuilt, never edited.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    shape: Shape,
    topology: Topology,
    vertices: Vec<Vertex>,
}

impl Geometry {
    pub fn for_shape(shape: Shape) -> Self {
        match shape {
            Shape::Square => Self::square(),
            Shape::Circle => Self::circle(CIRCLE_SEGMENTS),
        }
    }

    /// Full-viewport quad as a 4-vertex strip.
    pub fn square() -> Self {
        Self {
            shape: Shape::Square,
            topology: Topology::TriangleStrip,
            vertices: vec![
                Vertex::new(-1.0, -1.0, 0.0, 1.0),
                Vertex::new(1.0, -1.0, 1.0, 1.0),
                Vertex::new(-1.0, 1.0, 0.0, 0.0),
                Vertex::new(1.0, 1.0, 1.0, 0.0),
            ],
        }
    }

    /// Unit disk as a fan: one center vertex plus `segments` perimeter
    /// vertices. Texture coordinates map the disk onto `[0, 1]^2`.
    pub fn circle(segments: u32) -> Self {
        let segments = segments.max(MIN_CIRCLE_SEGMENTS);
        let mut vertices = Vec::with_capacity(segments as usize + 1);
        vertices.push(Vertex::new(0.0, 0.0, 0.5, 0.5));

        for i in 0..segments {
            let angle = std::f32::consts::TAU * i as f32 / segments as f32;
            let (sin, cos) = angle.sin_cos();
            vertices.push(Vertex::new(cos, sin, 0.5 + 0.5 * cos, 0.5 - 0.5 * sin));
        }

        Self {
            shape: Shape::Circle,
            topology: Topology::TriangleFan,
            vertices,
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }
}

/// Triangle-list indices for a closed fan with `vertex_count` vertices
/// (hub first). The last triangle wraps back to the first perimeter vertex.
pub fn fan_indices(vertex_count: u32) -> Vec<u16> {
    let perimeter = vertex_count.saturating_sub(1);
    if perimeter < 2 {
        return Vec::new();
    }
    let mut indices = Vec::with_capacity(perimeter as usize * 3);
    for i in 1..=perimeter {
        let next = if i == perimeter { 1 } else { i + 1 };
        indices.extend_from_slice(&[0, i as u16, next as u16]);
    }
    indices
}
