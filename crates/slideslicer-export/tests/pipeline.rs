//! End-to-end: JSON annotations -> collection with thumbnail tissue ->
//! tiled patches -> patch records and COCO masks.

#![allow(clippy::unwrap_used)]

use image::{GrayImage, Rgba, RgbaImage};
use slideslicer_export::{
    CocoRle, JsonAnnotationParser, PatchRoiRecord, collection_to_json, from_json,
};
use slideslicer_roi::{
    AnnotationParser, ColorMode, CollectionConfig, Dimensions, NameFilter, PatchOutput,
    PatchTileIterator, Point, RoiCollection, RoiError, SlideSource, TISSUE_NAME, TilingConfig,
    TissueSegmenter,
};

const STAIN: Rgba<u8> = Rgba([190, 90, 160, 255]);
const GLASS: Rgba<u8> = Rgba([245, 245, 245, 255]);

/// A 2000x2000 single-level slide with a 200x200 thumbnail.
struct MemorySlide;

impl SlideSource for MemorySlide {
    fn dimensions(&self) -> Result<Dimensions, RoiError> {
        Ok(Dimensions {
            width: 2000,
            height: 2000,
        })
    }

    fn thumbnail(&self, _max_size: u32) -> Result<RgbaImage, RoiError> {
        Ok(RgbaImage::from_pixel(200, 200, GLASS))
    }

    fn read_region(&self, _: Point, _: usize, size: Dimensions) -> Result<RgbaImage, RoiError> {
        Ok(RgbaImage::from_pixel(size.width, size.height, STAIN))
    }

    fn median_color(&self) -> Result<Rgba<u8>, RoiError> {
        Ok(GLASS)
    }
}

/// Thumbnail: one square chunk at [20, 80]. Patches: a square inset by
/// a few pixels from the patch edge.
struct ScriptedSegmenter;

impl TissueSegmenter for ScriptedSegmenter {
    fn segment(&self, pixels: &RgbaImage, _: ColorMode, _: u32) -> GrayImage {
        GrayImage::new(pixels.width(), pixels.height())
    }

    fn mask_to_contours(&self, mask: &GrayImage, _: usize) -> Vec<Vec<Point>> {
        let (lo, hi) = if mask.width() == 200 {
            (20.0, 80.0)
        } else {
            (2.0, f64::from(mask.width()) - 3.0)
        };
        vec![vec![
            Point::new(lo, lo),
            Point::new(hi, lo),
            Point::new(hi, hi),
            Point::new(lo, hi),
        ]]
    }
}

const ANNOTATIONS: &str = r#"[
  {"id": 1, "name": "Glom.", "type": "polygon",
   "vertices": [[300, 300], [360, 300], [360, 350], [300, 350]],
   "area": 3000.0, "area_microns": 750.0},
  {"id": 2, "name": "glom", "type": "ellipse",
   "vertices": [[500, 500], [580, 560]],
   "area": 3769.9, "area_microns": 942.5},
  {"id": 5, "name": "infl", "type": "polygon",
   "vertices": [[650, 650], [700, 650], [700, 700], [650, 700]],
   "area": 2500.0, "area_microns": 625.0},
  {"id": 6, "name": "infl", "type": "polygon",
   "vertices": [[1500, 1500], [1550, 1500], [1550, 1550]],
   "area": 1250.0, "area_microns": 312.5}
]"#;

fn collection() -> RoiCollection {
    RoiCollection::from_annotations(
        &JsonAnnotationParser,
        ANNOTATIONS,
        &MemorySlide,
        &ScriptedSegmenter,
        CollectionConfig::default(),
    )
    .unwrap()
}

#[test]
fn annotations_gain_thumbnail_tissue() {
    let collection = collection();
    let tissue: Vec<_> = collection.tissue().collect();
    assert_eq!(tissue.len(), 1);
    assert_eq!(tissue[0].id, 7);
    assert_eq!(tissue[0].name, TISSUE_NAME);
    // 600x600 slide pixels at the annotations' 0.25 um^2 per px^2.
    assert!((tissue[0].source.area_microns.unwrap() - 90_000.0).abs() < 1e-6);
    assert_eq!(collection.containment().get(7), Some(&[1, 2, 5][..]));
    assert_eq!(collection.name_counts()["glom"], 2);
    assert_eq!(collection.features().count(), 4);
}

#[test]
fn persisted_roi_set_reloads() {
    let collection = collection();
    let json = collection_to_json(&collection).unwrap();
    let records = from_json(&json).unwrap();
    assert_eq!(records.len(), collection.len());

    let parsed = JsonAnnotationParser.parse(&json).unwrap();
    let config = CollectionConfig {
        tissue: slideslicer_roi::TissueExtraction::None,
        ..CollectionConfig::default()
    };
    let reloaded = RoiCollection::new(parsed, config).unwrap();
    let ids = |c: &RoiCollection| c.rois().iter().map(|r| r.id).collect::<Vec<_>>();
    assert_eq!(ids(&reloaded), ids(&collection));
}

#[test]
fn tiled_patches_export_as_records() {
    let collection = collection();
    let region = collection.tissue().next().unwrap().polygon.clone();
    let config = TilingConfig {
        side: 32,
        subsample: 4,
        with_rois: true,
        ..TilingConfig::default()
    };
    let tiles = PatchTileIterator::from_region(&collection, &MemorySlide, &region, config)
        .unwrap()
        .with_segmenter(&ScriptedSegmenter);
    assert_eq!(tiles.points().len(), 25);
    assert_eq!(tiles.len(), 7);

    let next_id = collection.next_id();
    let mut feature_records = 0;
    for batch in tiles {
        let batch = batch.unwrap();
        assert!(batch.pixels.iter().all(|p| p.dimensions() == (32, 32)));
        for output in batch.rois.unwrap() {
            let PatchOutput::Rois(rois) = output else {
                unreachable!("polygons requested");
            };
            for roi in &rois {
                assert!(roi.area_fraction > 0.0 && roi.area_fraction <= 1.0 + 1e-9);
                if roi.name == TISSUE_NAME {
                    assert!(roi.id == 7 || roi.id >= next_id);
                } else {
                    feature_records += 1;
                }

                let record = PatchRoiRecord::from(roi);
                let json = serde_json::to_string(&record).unwrap();
                let back: PatchRoiRecord = serde_json::from_str(&json).unwrap();
                let coco: CocoRle = back.coco().unwrap();
                let restored = coco.compress().decompress().unwrap().to_mask().unwrap();
                assert_eq!(restored.decode(), roi.rle.as_ref().unwrap().decode());
            }
        }
    }
    assert!(feature_records >= 3);
}

#[test]
fn tiled_masks_select_by_name() {
    let collection = collection();
    let config = TilingConfig {
        side: 32,
        subsample: 4,
        batch_size: 1,
        with_rois: true,
        mask_names: Some(NameFilter::names(["glom"])),
        refine_tissue: false,
        ..TilingConfig::default()
    };
    let points = vec![Point::new(330.0, 325.0), Point::new(1500.0, 300.0)];
    let mut tiles =
        PatchTileIterator::from_points(&collection, &MemorySlide, points, config).unwrap();

    let on_glom = tiles.next().unwrap().unwrap();
    let PatchOutput::Mask(mask) = &on_glom.rois.unwrap()[0] else {
        unreachable!("mask requested");
    };
    assert_eq!(mask.dimensions(), (32, 32));
    assert_eq!(mask.get_pixel(16, 16).0[0], 1);

    let off_glom = tiles.next().unwrap().unwrap();
    let PatchOutput::Mask(mask) = &off_glom.rois.unwrap()[0] else {
        unreachable!("mask requested");
    };
    assert!(mask.pixels().all(|p| p.0[0] == 0));
    assert!(tiles.next().is_none());
}
