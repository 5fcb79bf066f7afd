//! Collaborator contracts for image data and server layouts.
//!
//! [`ImageSource`] is what the engine consumes. [`RemoteSource`] implements it
//! over any request/response [`Transport`] using the server's wire formats:
//! JSON request bodies and msgpack responses carrying raw encoded image bytes.

use std::fmt;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::texture_atlas::Bitmap;
use crate::utils::Rectangle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
}

/// Native pixel size of one image in a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMeta {
    pub id: String,
    pub width: u32,
    pub height: u32,
}

/// One entry of a bulk fetch: the image is scaled to fit `width`×`height`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkImageRequest {
    pub id: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtlasMappingEntry {
    pub id: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl AtlasMappingEntry {
    pub fn rect(&self) -> Option<Rectangle> {
        Rectangle::try_new(
            self.x as f32,
            self.y as f32,
            self.width as f32,
            self.height as f32,
        )
        .ok()
    }
}

/// A pre-baked atlas served once per collection.
#[derive(Debug, Clone)]
pub struct StaticAtlas {
    pub bitmap: Bitmap,
    pub mapping: Vec<AtlasMappingEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DistanceFunction {
    Palette,
    DateTime,
    PaletteCos,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompareFunction {
    SignedDist {
        dist: DistanceFunction,
    },
    ComparativeDist {
        dist: DistanceFunction,
        compared_to: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridAnchor {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridDistance {
    Manhattan,
    PseudoPythegorean,
    Pythegorean,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayoutOptions {
    GridExpansion {
        #[serde(skip_serializing_if = "Option::is_none")]
        anchor: Option<GridAnchor>,
        #[serde(skip_serializing_if = "Option::is_none")]
        grid_dist: Option<GridDistance>,
        compare: CompareFunction,
    },
    Sort {
        compare: CompareFunction,
    },
    Tsne {
        dist: DistanceFunction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    Palette,
    DateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_metadata: Option<Vec<MetadataKind>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl LayoutFilter {
    pub fn is_empty(&self) -> bool {
        self.has_metadata.is_none() && self.limit.is_none()
    }
}

/// Body of a server layout request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutRequest {
    #[serde(flatten)]
    pub options: LayoutOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<LayoutFilter>,
}

/// Server-computed placement, in one of three shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ApiLayout {
    /// Rows of cells; `None` leaves a cell empty.
    Grid(Vec<Vec<Option<String>>>),
    /// Ids in display order.
    Sort(Vec<String>),
    /// Normalised positions.
    Pos(Vec<(String, f32, f32)>),
}

/// Where image data and layouts come from.
///
/// Calls are blocking and run on the atlas worker thread.
pub trait ImageSource: Send + Sync {
    fn fetch_collections(&self) -> Result<Vec<Collection>>;
    fn fetch_image_metadata(&self, collection: &str) -> Result<Vec<ImageMeta>>;
    /// The response is positional: entry `i` answers `request[i]`, `None`
    /// meaning the image is unavailable.
    fn fetch_bulk_images(
        &self,
        collection: &str,
        request: &[BulkImageRequest],
    ) -> Result<Vec<Option<Bitmap>>>;
    fn fetch_static_atlas(&self, collection: &str) -> Result<Vec<StaticAtlas>>;
    fn fetch_layout(&self, collection: &str, request: &LayoutRequest) -> Result<ApiLayout>;
}

/// Request/response plumbing under [`RemoteSource`].
pub trait Transport: Send + Sync {
    fn get(&self, path: &str) -> Result<Vec<u8>>;
    fn post_json(&self, path: &str, body: &[u8]) -> Result<Vec<u8>>;
}

/// An [`ImageSource`] speaking the collection server's wire format.
pub struct RemoteSource<T> {
    transport: T,
}

impl<T: Transport> RemoteSource<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> ImageSource for RemoteSource<T> {
    fn fetch_collections(&self) -> Result<Vec<Collection>> {
        let body = self.transport.get("collections")?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn fetch_image_metadata(&self, collection: &str) -> Result<Vec<ImageMeta>> {
        let body = self.transport.get(collection)?;
        decode_image_metadata(&body)
    }

    fn fetch_bulk_images(
        &self,
        collection: &str,
        request: &[BulkImageRequest],
    ) -> Result<Vec<Option<Bitmap>>> {
        let body = encode_bulk_request(request)?;
        let payload = self
            .transport
            .post_json(&format!("{collection}/bulk"), &body)?;
        decode_bulk_images(&payload, request.len())
    }

    fn fetch_static_atlas(&self, collection: &str) -> Result<Vec<StaticAtlas>> {
        let payload = self.transport.get(&format!("{collection}/atlas"))?;
        decode_static_atlas(&payload)
    }

    fn fetch_layout(&self, collection: &str, request: &LayoutRequest) -> Result<ApiLayout> {
        let body = serde_json::to_vec(request)?;
        let payload = self
            .transport
            .post_json(&format!("{collection}/layout"), &body)?;
        decode_layout(&payload)
    }
}

/// Binary blob that accepts msgpack `bin` as well as an array of bytes.
struct RawBytes(Vec<u8>);

impl<'de> Deserialize<'de> for RawBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RawBytesVisitor;

        impl<'de> Visitor<'de> for RawBytesVisitor {
            type Value = RawBytes;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("binary data")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<RawBytes, E> {
                Ok(RawBytes(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<RawBytes, E> {
                Ok(RawBytes(v))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<RawBytes, A::Error> {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(b) = seq.next_element::<u8>()? {
                    bytes.push(b);
                }
                Ok(RawBytes(bytes))
            }
        }

        deserializer.deserialize_any(RawBytesVisitor)
    }
}

#[derive(Deserialize)]
struct StaticAtlasWire {
    data: RawBytes,
    mapping: Vec<AtlasMappingEntry>,
}

/// Decodes one encoded image (PNG, JPEG, ...) to RGBA8.
pub fn decode_bitmap(bytes: &[u8]) -> Result<Bitmap> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// JSON `[[id, width, height], ...]`.
pub fn decode_image_metadata(body: &[u8]) -> Result<Vec<ImageMeta>> {
    let rows: Vec<(String, u32, u32)> = serde_json::from_slice(body)?;
    Ok(rows
        .into_iter()
        .map(|(id, width, height)| ImageMeta { id, width, height })
        .collect())
}

/// JSON `[[id, width, height], ...]`.
pub fn encode_bulk_request(request: &[BulkImageRequest]) -> Result<Vec<u8>> {
    let rows: Vec<(&str, u32, u32)> = request
        .iter()
        .map(|r| (r.id.as_str(), r.width, r.height))
        .collect();
    Ok(serde_json::to_vec(&rows)?)
}

/// Msgpack `[bin | nil, ...]`, positional to the request.
///
/// Missing, empty or undecodable entries become `None`; only a malformed outer
/// payload is an error. The result always has `expected` entries.
pub fn decode_bulk_images(payload: &[u8], expected: usize) -> Result<Vec<Option<Bitmap>>> {
    let entries: Vec<Option<RawBytes>> = rmp_serde::from_slice(payload)?;
    if entries.len() != expected {
        log::warn!(
            "bulk response has {} entries for {} requested images",
            entries.len(),
            expected
        );
    }

    let mut bitmaps: Vec<Option<Bitmap>> = entries
        .into_iter()
        .take(expected)
        .enumerate()
        .map(|(i, entry)| match entry {
            Some(RawBytes(bytes)) if !bytes.is_empty() => match decode_bitmap(&bytes) {
                Ok(bitmap) => Some(bitmap),
                Err(e) => {
                    log::warn!("bulk entry {i} failed to decode: {e}");
                    None
                }
            },
            _ => None,
        })
        .collect();
    bitmaps.resize_with(expected, || None);
    Ok(bitmaps)
}

/// Msgpack `[{data: bin, mapping: [{id, x, y, width, height}]}, ...]`.
///
/// An atlas whose image fails to decode is skipped; its ids fall back to
/// placeholder loads. Only a malformed outer payload is an error.
pub fn decode_static_atlas(payload: &[u8]) -> Result<Vec<StaticAtlas>> {
    let wire: Vec<StaticAtlasWire> = rmp_serde::from_slice(payload)?;
    Ok(wire
        .into_iter()
        .enumerate()
        .filter_map(|(i, atlas)| match decode_bitmap(&atlas.data.0) {
            Ok(bitmap) => Some(StaticAtlas {
                bitmap,
                mapping: atlas.mapping,
            }),
            Err(e) => {
                log::warn!(
                    "static atlas {i} with {} images failed to decode: {e}",
                    atlas.mapping.len()
                );
                None
            }
        })
        .collect())
}

/// Msgpack `{type: "grid" | "sort" | "pos", data}`.
pub fn decode_layout(payload: &[u8]) -> Result<ApiLayout> {
    Ok(rmp_serde::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MosaicError;
    use serde::Serializer;
    use serde_json::json;

    fn png(w: u32, h: u32) -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(Bitmap::new(w, h))
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    struct Bin<'a>(&'a [u8]);

    impl Serialize for Bin<'_> {
        fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
            s.serialize_bytes(self.0)
        }
    }

    /// Msgpack array of `bin | nil`.
    fn msgpack_bins(entries: &[Option<Vec<u8>>]) -> Vec<u8> {
        let wire: Vec<Option<Bin>> = entries.iter().map(|e| e.as_deref().map(Bin)).collect();
        rmp_serde::to_vec(&wire).unwrap()
    }

    #[test]
    fn bulk_request_is_positional_json() {
        let body = encode_bulk_request(&[
            BulkImageRequest {
                id: "a".into(),
                width: 20,
                height: 30,
            },
            BulkImageRequest {
                id: "b".into(),
                width: 1,
                height: 2,
            },
        ])
        .unwrap();
        assert_eq!(String::from_utf8(body).unwrap(), r#"[["a",20,30],["b",1,2]]"#);
    }

    #[test]
    fn bulk_response_keeps_positions_of_missing_images() {
        let payload = msgpack_bins(&[Some(png(3, 2)), None, Some(Vec::new()), Some(vec![1, 2, 3])]);
        let images = decode_bulk_images(&payload, 4).unwrap();
        assert_eq!(images.len(), 4);
        assert_eq!(images[0].as_ref().map(|b| b.dimensions()), Some((3, 2)));
        assert!(images[1..].iter().all(Option::is_none));
    }

    #[test]
    fn short_bulk_response_is_padded() {
        let payload = msgpack_bins(&[Some(png(1, 1))]);
        let images = decode_bulk_images(&payload, 3).unwrap();
        assert_eq!(images.len(), 3);
        assert!(images[0].is_some());
    }

    #[test]
    fn malformed_bulk_payload_is_an_error() {
        assert!(matches!(
            decode_bulk_images(&[0xc1], 1),
            Err(MosaicError::Wire(_))
        ));
    }

    #[test]
    fn undecodable_static_atlas_is_skipped() {
        #[derive(Serialize)]
        struct Atlas<'a> {
            data: Bin<'a>,
            mapping: Vec<AtlasMappingEntry>,
        }
        let entry = |id: &str| AtlasMappingEntry {
            id: id.into(),
            x: 0,
            y: 0,
            width: 2,
            height: 2,
        };
        let good = png(4, 2);
        let payload = rmp_serde::to_vec_named(&vec![
            Atlas {
                data: Bin(&[9, 9, 9]),
                mapping: vec![entry("broken")],
            },
            Atlas {
                data: Bin(&good),
                mapping: vec![entry("a"), entry("b")],
            },
        ])
        .unwrap();

        let atlases = decode_static_atlas(&payload).unwrap();
        assert_eq!(atlases.len(), 1);
        assert_eq!(atlases[0].bitmap.dimensions(), (4, 2));
        assert_eq!(atlases[0].mapping, vec![entry("a"), entry("b")]);

        assert!(matches!(decode_static_atlas(&[0xc1]), Err(MosaicError::Wire(_))));
    }

    #[test]
    fn layout_variants_decode_from_msgpack_maps() {
        let pos = rmp_serde::to_vec(&json!({"type": "pos", "data": [["a", 0.5, 1.0]]})).unwrap();
        assert_eq!(
            decode_layout(&pos).unwrap(),
            ApiLayout::Pos(vec![("a".into(), 0.5, 1.0)])
        );

        let grid = rmp_serde::to_vec(&json!({"type": "grid", "data": [["a", null], [null, "b"]]}))
            .unwrap();
        assert_eq!(
            decode_layout(&grid).unwrap(),
            ApiLayout::Grid(vec![
                vec![Some("a".into()), None],
                vec![None, Some("b".into())]
            ])
        );
    }

    #[test]
    fn layout_request_body_shape() {
        let request = LayoutRequest {
            options: LayoutOptions::Sort {
                compare: CompareFunction::SignedDist {
                    dist: DistanceFunction::DateTime,
                },
            },
            filter: Some(LayoutFilter {
                has_metadata: Some(vec![MetadataKind::Palette]),
                limit: None,
            }),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "sort",
                "compare": {"type": "signed_dist", "dist": {"type": "date_time"}},
                "filter": {"has_metadata": ["palette"]}
            })
        );
    }

    #[test]
    fn metadata_rows() {
        let meta = decode_image_metadata(br#"[["x", 640, 480]]"#).unwrap();
        assert_eq!(
            meta,
            vec![ImageMeta {
                id: "x".into(),
                width: 640,
                height: 480
            }]
        );
    }
}
