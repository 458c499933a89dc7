//! Minimal Wavefront OBJ vertex reader/writer.
//!
//! Only `v` records are interpreted. Every other line (faces, normals,
//! texture coordinates, groups, comments) is kept verbatim, so a mesh that
//! is loaded, deformed and saved differs from its source only in vertex
//! positions.
//!
//! # Example
//!
//! ```ignore
//! use facial_retarget::obj::ObjMesh;
//!
//! let mut mesh = ObjMesh::load("neutral.obj")?;
//! let vertices = mesh.vertices().to_vec();
//! mesh.save("neutral_copy.obj")?;
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::accumulator::MeshAccess;
use crate::error::{Error, Result};
use crate::types::Vec3;

#[derive(Debug, Clone, PartialEq)]
enum Line {
    /// Index into the vertex buffer plus anything after `x y z` (`w`, colors).
    Vertex { index: usize, extra: String },
    Other(String),
}

/// OBJ file held as vertex positions plus the untouched remainder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjMesh {
    lines: Vec<Line>,
    vertices: Vec<Vec3>,
}

impl ObjMesh {
    /// Mesh consisting only of `v` records.
    pub fn from_vertices(vertices: Vec<Vec3>) -> Self {
        let lines = (0..vertices.len())
            .map(|index| Line::Vertex {
                index,
                extra: String::new(),
            })
            .collect();
        Self { lines, vertices }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::MeshLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_reader(BufReader::new(file)).map_err(|e| Error::MeshLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut mesh = Self::default();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let mut tokens = line.split_whitespace();
            if tokens.next() != Some("v") {
                mesh.lines.push(Line::Other(line));
                continue;
            }

            let mut coord = || -> Result<f32> {
                tokens
                    .next()
                    .and_then(|t| t.parse::<f32>().ok())
                    .ok_or_else(|| {
                        Error::MalformedDocument(format!("line {}: bad vertex record", number + 1))
                    })
            };
            let position = Vec3::new(coord()?, coord()?, coord()?);
            let extra: String = tokens.flat_map(|t| [" ", t]).collect();

            mesh.lines.push(Line::Vertex {
                index: mesh.vertices.len(),
                extra,
            });
            mesh.vertices.push(position);
        }
        Ok(mesh)
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn into_vertices(self) -> Vec<Vec3> {
        self.vertices
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        for line in &self.lines {
            match line {
                Line::Vertex { index, extra } => {
                    let v = self.vertices[*index];
                    writeln!(writer, "v {} {} {}{}", v.x, v.y, v.z, extra)?;
                }
                Line::Other(text) => writeln!(writer, "{}", text)?,
            }
        }
        Ok(())
    }
}

/// Vertex positions of an OBJ file.
pub fn load_vertices<P: AsRef<Path>>(path: P) -> Result<Vec<Vec3>> {
    Ok(ObjMesh::load(path)?.into_vertices())
}

impl MeshAccess for ObjMesh {
    fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    fn read_vertices(&self) -> Result<Vec<Vec3>> {
        Ok(self.vertices.clone())
    }

    fn write_vertices(&mut self, vertices: &[Vec3]) -> Result<()> {
        if vertices.len() != self.vertices.len() {
            return Err(Error::WriteBackFailed(format!(
                "mesh has {} vertices, got {}",
                self.vertices.len(),
                vertices.len()
            )));
        }
        self.vertices.copy_from_slice(vertices);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: &str = "\
# quad
o face
v 0 0 0
v 1.5 0 0 1.0
vn 0 0 1
v 1 1 0
f 1//1 2//1 3//1
";

    #[test]
    fn parses_vertex_records_only() {
        let mesh = ObjMesh::from_reader(QUAD.as_bytes()).unwrap();
        assert_eq!(
            mesh.vertices(),
            &[
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.5, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0)
            ]
        );
    }

    #[test]
    fn write_back_keeps_other_lines() {
        let mut mesh = ObjMesh::from_reader(QUAD.as_bytes()).unwrap();
        let mut moved = mesh.read_vertices().unwrap();
        moved[2].z = 0.25;
        mesh.write_vertices(&moved).unwrap();

        let mut out = Vec::new();
        mesh.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "# quad\no face\nv 0 0 0\nv 1.5 0 0 1.0\nvn 0 0 1\nv 1 1 0.25\nf 1//1 2//1 3//1\n"
        );
    }

    #[test]
    fn wrong_length_write_is_rejected() {
        let mut mesh = ObjMesh::from_vertices(vec![Vec3::zero(); 2]);
        let err = mesh.write_vertices(&[Vec3::zero()]).unwrap_err();
        assert!(matches!(err, Error::WriteBackFailed(_)));
        assert_eq!(mesh.vertex_count(), 2);
    }

    #[test]
    fn bad_vertex_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.obj");
        std::fs::write(&path, "v 1 2\n").unwrap();

        match ObjMesh::load(&path).unwrap_err() {
            Error::MeshLoad { path: p, message } => {
                assert_eq!(p, path);
                assert!(message.contains("line 1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.obj");
        let mesh = ObjMesh::from_vertices(vec![Vec3::new(0.1, -2.0, 3.25)]);
        mesh.save(&path).unwrap();
        assert_eq!(load_vertices(&path).unwrap(), mesh.vertices());
    }
}
