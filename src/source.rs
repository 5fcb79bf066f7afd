//! A local folder served as a single collection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;

use crate::api::{
    ApiLayout, BulkImageRequest, Collection, ImageMeta, ImageSource, LayoutRequest, StaticAtlas,
};
use crate::error::{MosaicError, Result};
use crate::texture_atlas::Bitmap;

pub struct DirectorySource {
    collection: Collection,
    /// Image id (file name) to path, sorted by id.
    files: BTreeMap<String, PathBuf>,
}

impl DirectorySource {
    /// Indexes every file in `dir` the `image` crate recognizes by extension.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files = BTreeMap::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || image::ImageFormat::from_path(&path).is_err() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                files.insert(name.to_owned(), path.clone());
            }
        }
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("images")
            .to_owned();
        log::info!("indexed {} images in {}", files.len(), dir.display());
        Ok(Self {
            collection: Collection {
                id: name.clone(),
                name,
            },
            files,
        })
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn check_collection(&self, collection: &str) -> Result<()> {
        if collection == self.collection.id {
            Ok(())
        } else {
            Err(MosaicError::Fetch {
                what: format!("collection {collection}"),
                reason: "not found".into(),
            })
        }
    }

    fn load_scaled(&self, request: &BulkImageRequest) -> Option<Bitmap> {
        let path = self.files.get(&request.id)?;
        match image::open(path) {
            Ok(img) => {
                let img = if img.width() > request.width || img.height() > request.height {
                    img.resize(request.width.max(1), request.height.max(1), FilterType::Triangle)
                } else {
                    img
                };
                Some(img.to_rgba8())
            }
            Err(e) => {
                log::warn!("could not decode {}: {e}", path.display());
                None
            }
        }
    }
}

impl ImageSource for DirectorySource {
    fn fetch_collections(&self) -> Result<Vec<Collection>> {
        Ok(vec![self.collection.clone()])
    }

    fn fetch_image_metadata(&self, collection: &str) -> Result<Vec<ImageMeta>> {
        self.check_collection(collection)?;
        Ok(self
            .files
            .iter()
            .filter_map(|(id, path)| match image::image_dimensions(path) {
                Ok((width, height)) => Some(ImageMeta {
                    id: id.clone(),
                    width,
                    height,
                }),
                Err(e) => {
                    log::warn!("skipping {}: {e}", path.display());
                    None
                }
            })
            .collect())
    }

    fn fetch_bulk_images(
        &self,
        collection: &str,
        request: &[BulkImageRequest],
    ) -> Result<Vec<Option<Bitmap>>> {
        self.check_collection(collection)?;
        Ok(request.iter().map(|r| self.load_scaled(r)).collect())
    }

    /// Folders carry no pre-baked atlas; every image starts as a placeholder.
    fn fetch_static_atlas(&self, collection: &str) -> Result<Vec<StaticAtlas>> {
        self.check_collection(collection)?;
        Ok(Vec::new())
    }

    /// Every server layout degrades to file-name order.
    fn fetch_layout(&self, collection: &str, request: &LayoutRequest) -> Result<ApiLayout> {
        self.check_collection(collection)?;
        let limit = request
            .filter
            .as_ref()
            .and_then(|f| f.limit)
            .unwrap_or(usize::MAX);
        Ok(ApiLayout::Sort(
            self.files.keys().take(limit).cloned().collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CompareFunction, DistanceFunction, LayoutFilter, LayoutOptions};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mosaic-source-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn serves_scaled_images_from_folder() {
        let dir = temp_dir("scaled");
        Bitmap::new(40, 20).save(dir.join("b.png")).unwrap();
        Bitmap::new(8, 8).save(dir.join("a.png")).unwrap();
        std::fs::write(dir.join("notes.txt"), "not an image").unwrap();

        let source = DirectorySource::new(&dir).unwrap();
        let id = source.collection().id.clone();
        assert_eq!(source.len(), 2);

        let meta = source.fetch_image_metadata(&id).unwrap();
        assert_eq!(
            meta,
            vec![
                ImageMeta {
                    id: "a.png".into(),
                    width: 8,
                    height: 8
                },
                ImageMeta {
                    id: "b.png".into(),
                    width: 40,
                    height: 20
                },
            ]
        );

        let bitmaps = source
            .fetch_bulk_images(
                &id,
                &[
                    BulkImageRequest {
                        id: "b.png".into(),
                        width: 10,
                        height: 10,
                    },
                    BulkImageRequest {
                        id: "missing.png".into(),
                        width: 10,
                        height: 10,
                    },
                ],
            )
            .unwrap();
        assert_eq!(bitmaps[0].as_ref().map(|b| b.dimensions()), Some((10, 5)));
        assert!(bitmaps[1].is_none());

        assert!(source.fetch_image_metadata("elsewhere").is_err());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn layout_request_falls_back_to_name_order() {
        let dir = temp_dir("layout");
        for name in ["c.png", "a.png", "b.png"] {
            Bitmap::new(2, 2).save(dir.join(name)).unwrap();
        }
        let source = DirectorySource::new(&dir).unwrap();
        let request = LayoutRequest {
            options: LayoutOptions::Sort {
                compare: CompareFunction::SignedDist {
                    dist: DistanceFunction::Palette,
                },
            },
            filter: Some(LayoutFilter {
                has_metadata: None,
                limit: Some(2),
            }),
        };
        let layout = source
            .fetch_layout(&source.collection().id, &request)
            .unwrap();
        assert_eq!(layout, ApiLayout::Sort(vec!["a.png".into(), "b.png".into()]));
        std::fs::remove_dir_all(dir).unwrap();
    }
}
