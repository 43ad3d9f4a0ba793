//! Masked multi-region template matching with thresholding, non-maximum
//! suppression and bounded match counts.

use rand::RngCore;

use crate::model::{ImageCondition, MatchMethod, Rect};

/// A raw 3-channel 8-bit-per-channel frame buffer with known dimensions.
/// Row-major, 3 bytes per pixel (R, G, B).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * 3,
            "bitmap data length must match width*height*3"
        );
        Self {
            width,
            height,
            data,
        }
    }

    pub fn filled(width: u32, height: u32, rng: &mut impl RngCore) -> Self {
        let mut data = vec![0u8; width as usize * height as usize * 3];
        rng.fill_bytes(&mut data);
        Self {
            width,
            height,
            data,
        }
    }

    #[inline]
    pub fn pixel(&self, x: i64, y: i64) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    #[inline]
    fn set_pixel(&mut self, x: i64, y: i64, v: [u8; 3]) {
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        self.data[idx..idx + 3].copy_from_slice(&v);
    }

    /// Crops to `rect`, which must lie entirely within bounds.
    pub fn crop(&self, rect: Rect) -> Bitmap {
        let w = rect.width() as u32;
        let h = rect.height() as u32;
        let mut data = Vec::with_capacity(w as usize * h as usize * 3);
        for y in rect.top..=rect.bottom {
            for x in rect.left..=rect.right {
                data.extend_from_slice(&self.pixel(x, y));
            }
        }
        Bitmap::new(w, h, data)
    }

    pub fn to_image(&self) -> image::RgbImage {
        image::RgbImage::from_raw(self.width, self.height, self.data.clone())
            .expect("dimensions already validated at construction")
    }

    pub fn from_image(img: &image::RgbImage) -> Self {
        Bitmap::new(img.width(), img.height(), img.as_raw().clone())
    }

    pub fn decode_png(bytes: &[u8]) -> anyhow::Result<Self> {
        let img = image::load_from_memory(bytes)?.into_rgb8();
        Ok(Self::from_image(&img))
    }

    pub fn encode_png(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buf);
        self.to_image()
            .write_to(&mut cursor, image::ImageFormat::Png)?;
        Ok(buf)
    }
}

/// One accepted match: similarity score plus its top-left position in the
/// coordinate space it was reported in (observed-frame coordinates once
/// returned from [`similarity`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub score: f32,
    pub row: i64,
    pub col: i64,
}

fn bounding_box(rects: &[Rect]) -> Rect {
    let mut r = rects[0];
    for rect in &rects[1..] {
        r.left = r.left.min(rect.left);
        r.top = r.top.min(rect.top);
        r.right = r.right.max(rect.right);
        r.bottom = r.bottom.max(rect.bottom);
    }
    r
}

fn union_contains(rects: &[Rect], x: i64, y: i64) -> bool {
    rects
        .iter()
        .any(|r| x >= r.left && x <= r.right && y >= r.top && y <= r.bottom)
}

/// Builds the masked `search` buffer: a same-size random-filled copy of
/// `observed` with the pixels inside `allow_regions` restored, cropped to
/// their bounding box.
fn build_search(observed: &Bitmap, allow_regions: &[Rect], rng: &mut impl RngCore) -> (Bitmap, Rect) {
    let mut masked = Bitmap::filled(observed.width, observed.height, rng);
    for region in allow_regions {
        for y in region.top..=region.bottom {
            for x in region.left..=region.right {
                masked.set_pixel(x, y, observed.pixel(x, y));
            }
        }
    }
    let bbox = bounding_box(allow_regions);
    (masked.crop(bbox), bbox)
}

/// Builds the `template` (reference cropped to the regions' bounding box)
/// and a same-size 0/255 `mask` marking which pixels of the bounding box
/// fall inside a region.
fn build_template(reference: &Bitmap, regions: &[Rect]) -> (Bitmap, Vec<bool>, Rect) {
    let bbox = bounding_box(regions);
    let template = reference.crop(bbox);
    let w = template.width as i64;
    let h = template.height as i64;
    let mut mask = vec![false; (w * h) as usize];
    for ly in 0..h {
        for lx in 0..w {
            let x = bbox.left + lx;
            let y = bbox.top + ly;
            mask[(ly * w + lx) as usize] = union_contains(regions, x, y);
        }
    }
    (template, mask, bbox)
}

/// Raw per-position similarity score map, before NaN/Inf cleanup.
fn score_map(search: &Bitmap, template: &Bitmap, mask: &[bool], method: MatchMethod) -> Vec<Vec<f32>> {
    let sw = search.width as i64;
    let sh = search.height as i64;
    let tw = template.width as i64;
    let th = template.height as i64;
    let n = (sh - th + 1).max(0);
    let m = (sw - tw + 1).max(0);
    let mut scores = vec![vec![f32::NEG_INFINITY; m as usize]; n as usize];

    match method {
        MatchMethod::CcorrNormed => {
            for i in 0..n {
                for j in 0..m {
                    scores[i as usize][j as usize] =
                        masked_ccorr_normed(search, template, mask, i, j, tw, th);
                }
            }
        }
        MatchMethod::CcoeffNormed => {
            // masking is unreliable for CCOEFF; compute
            // over the whole template/search window instead.
            for i in 0..n {
                for j in 0..m {
                    scores[i as usize][j as usize] = ccoeff_normed(search, template, i, j, tw, th);
                }
            }
        }
        MatchMethod::SqdiffNormed => {
            for i in 0..n {
                for j in 0..m {
                    let x = masked_sqdiff_normed(search, template, mask, i, j, tw, th);
                    scores[i as usize][j as usize] = (-x).exp();
                }
            }
        }
    }
    scores
}

fn luma(p: [u8; 3]) -> f64 {
    p[0] as f64 + p[1] as f64 + p[2] as f64
}

fn masked_ccorr_normed(
    search: &Bitmap,
    template: &Bitmap,
    mask: &[bool],
    i: i64,
    j: i64,
    tw: i64,
    th: i64,
) -> f32 {
    let mut num = 0.0f64;
    let mut denom_t = 0.0f64;
    let mut denom_i = 0.0f64;
    for ty in 0..th {
        for tx in 0..tw {
            if !mask[(ty * tw + tx) as usize] {
                continue;
            }
            let t = luma(template.pixel(tx, ty));
            let s = luma(search.pixel(j + tx, i + ty));
            num += t * s;
            denom_t += t * t;
            denom_i += s * s;
        }
    }
    let denom = (denom_t * denom_i).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (num / denom) as f32
    }
}

fn masked_sqdiff_normed(
    search: &Bitmap,
    template: &Bitmap,
    mask: &[bool],
    i: i64,
    j: i64,
    tw: i64,
    th: i64,
) -> f64 {
    let mut num = 0.0f64;
    let mut denom_t = 0.0f64;
    let mut denom_i = 0.0f64;
    for ty in 0..th {
        for tx in 0..tw {
            if !mask[(ty * tw + tx) as usize] {
                continue;
            }
            let t = luma(template.pixel(tx, ty));
            let s = luma(search.pixel(j + tx, i + ty));
            num += (s - t) * (s - t);
            denom_t += t * t;
            denom_i += s * s;
        }
    }
    let denom = (denom_t * denom_i).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        num / denom
    }
}

fn ccoeff_normed(search: &Bitmap, template: &Bitmap, i: i64, j: i64, tw: i64, th: i64) -> f32 {
    let count = (tw * th) as f64;
    let mut mean_t = 0.0f64;
    let mut mean_s = 0.0f64;
    for ty in 0..th {
        for tx in 0..tw {
            mean_t += luma(template.pixel(tx, ty));
            mean_s += luma(search.pixel(j + tx, i + ty));
        }
    }
    mean_t /= count;
    mean_s /= count;

    let mut num = 0.0f64;
    let mut denom_t = 0.0f64;
    let mut denom_s = 0.0f64;
    for ty in 0..th {
        for tx in 0..tw {
            let t = luma(template.pixel(tx, ty)) - mean_t;
            let s = luma(search.pixel(j + tx, i + ty)) - mean_s;
            num += t * s;
            denom_t += t * t;
            denom_s += s * s;
        }
    }
    let denom = (denom_t * denom_s).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (num / denom) as f32
    }
}

/// Non-maximum suppression over a score map: accept descending-score
/// candidates whose suppression box doesn't overlap a previously accepted
/// one, stopping at `match_limit` or once scores drop below `threshold`.
fn suppress(
    scores: &[Vec<f32>],
    threshold: f32,
    padding: i64,
    match_limit: i64,
    tw: i64,
    th: i64,
) -> Vec<Match> {
    let n = scores.len();
    if n == 0 {
        return vec![];
    }
    let m = scores[0].len();

    let mut pts: Vec<(i64, i64, f32)> = Vec::with_capacity(n * m);
    for (i, row) in scores.iter().enumerate() {
        for (j, &score) in row.iter().enumerate() {
            pts.push((i as i64, j as i64, score));
        }
    }
    pts.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let pn = (th + padding).max(0);
    let pm = (tw + padding).max(0);
    let mut accepted: Vec<(i64, i64)> = Vec::new();
    let mut result = Vec::new();

    for (i, j, score) in pts {
        if score < threshold {
            break;
        }
        let overlaps = accepted
            .iter()
            .any(|(ai, aj)| (ai - i).abs() <= pn && (aj - j).abs() <= pm);
        if overlaps {
            continue;
        }
        accepted.push((i, j));
        result.push(Match {
            score,
            row: i,
            col: j,
        });
        if result.len() as i64 >= match_limit {
            break;
        }
    }
    result
}

fn clean(scores: &mut [Vec<f32>]) {
    for row in scores {
        for v in row.iter_mut() {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
    }
}

fn global_max(scores: &[Vec<f32>]) -> f32 {
    scores
        .iter()
        .flat_map(|r| r.iter())
        .copied()
        .fold(f32::NEG_INFINITY, f32::max)
}

/// Evaluates an [`ImageCondition`] against an observed frame using a
/// reference frame, returning every accepted match in observed-frame
/// coordinates.
pub fn similarity(
    cond: &ImageCondition,
    observed: &Bitmap,
    reference: &Bitmap,
    rng: &mut impl RngCore,
) -> Vec<Match> {
    if cond.regions.is_empty() || cond.match_limit <= 0 {
        return vec![];
    }

    let allow_regions: Vec<Rect> = if cond.allow_regions.is_empty() {
        cond.regions.clone()
    } else {
        cond.allow_regions.clone()
    };

    // Optimization: a single region with many disjoint allow
    // regions is cheaper to evaluate per-allow-region than over their full
    // bounding box, since the search areas are small and disjoint.
    if cond.regions.len() == 1 && allow_regions.len() > 1 {
        let mut out = Vec::new();
        for region in &allow_regions {
            let sub = ImageCondition {
                allow_regions: vec![*region],
                ..cond.clone()
            };
            out.extend(similarity(&sub, observed, reference, rng));
        }
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        out.truncate(cond.match_limit as usize);
        return out;
    }

    let (search, search_origin) = build_search(observed, &allow_regions, rng);
    let (template, mask, _template_bbox) = build_template(reference, &cond.regions);

    let mut scores = score_map(&search, &template, &mask, cond.method);
    clean(&mut scores);

    if global_max(&scores) < cond.threshold {
        return vec![];
    }

    let matches = suppress(
        &scores,
        cond.threshold,
        cond.padding,
        cond.match_limit,
        template.width as i64,
        template.height as i64,
    );

    matches
        .into_iter()
        .map(|m| Match {
            score: m.score,
            row: m.row + search_origin.top,
            col: m.col + search_origin.left,
        })
        .collect()
}

/// `similarity(...).len() > 0`.
pub fn check_image(
    cond: &ImageCondition,
    observed: &Bitmap,
    reference: &Bitmap,
    rng: &mut impl RngCore,
) -> bool {
    !similarity(cond, observed, reference, rng).is_empty()
}

/// Batch-runs an [`ImageCondition`] over every reference frame in a routine,
/// for the editor's `sample_condition` message.
pub fn sample_over_frames<'a>(
    cond: &ImageCondition,
    observed: &Bitmap,
    frames: impl IntoIterator<Item = (&'a str, &'a Bitmap)>,
    rng: &mut impl RngCore,
) -> Vec<(&'a str, Vec<Match>)> {
    frames
        .into_iter()
        .map(|(id, reference)| (id, similarity(cond, observed, reference, rng)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn solid_frame(w: u32, h: u32, color: [u8; 3]) -> Bitmap {
        let mut data = Vec::with_capacity(w as usize * h as usize * 3);
        for _ in 0..(w * h) {
            data.extend_from_slice(&color);
        }
        Bitmap::new(w, h, data)
    }

    fn checker_frame(w: u32, h: u32) -> Bitmap {
        let mut data = Vec::with_capacity(w as usize * h as usize * 3);
        for y in 0..h {
            for x in 0..w {
                let v = if (x / 10 + y / 10) % 2 == 0 { 240 } else { 20 };
                data.extend_from_slice(&[v, v, v]);
            }
        }
        Bitmap::new(w, h, data)
    }

    #[test]
    fn identical_frames_single_region_match_near_origin() {
        let frame = checker_frame(64, 64);
        let cond = ImageCondition {
            frame_id: "f".into(),
            regions: vec![Rect {
                left: 0,
                top: 0,
                right: 9,
                bottom: 9,
            }],
            allow_regions: vec![],
            method: MatchMethod::CcorrNormed,
            threshold: 0.9,
            padding: 2,
            match_limit: 4,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let matches = similarity(&cond, &frame, &frame, &mut rng);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].row, 0);
        assert_eq!(matches[0].col, 0);
        assert!(matches[0].score > 0.99);
    }

    #[test]
    fn empty_regions_returns_no_matches() {
        let frame = solid_frame(16, 16, [1, 2, 3]);
        let cond = ImageCondition {
            frame_id: "f".into(),
            regions: vec![],
            allow_regions: vec![],
            method: MatchMethod::CcorrNormed,
            threshold: 0.5,
            padding: 0,
            match_limit: 4,
        };
        let mut rng = StdRng::seed_from_u64(2);
        assert!(similarity(&cond, &frame, &frame, &mut rng).is_empty());
    }

    #[test]
    fn nms_rejects_non_matching_region() {
        let frame = checker_frame(64, 64);
        let cond = ImageCondition {
            frame_id: "f".into(),
            regions: vec![Rect {
                left: 0,
                top: 0,
                right: 9,
                bottom: 9,
            }],
            allow_regions: vec![],
            method: MatchMethod::CcorrNormed,
            threshold: 0.999,
            padding: 0,
            match_limit: 4,
        };
        // shift the observed frame so it no longer lines up with the
        // reference at any offset within the single allow region.
        let mut shifted = solid_frame(64, 64, [128, 128, 128]);
        for y in 0..64u32 {
            for x in 0..64u32 {
                let p = frame.pixel(x as i64, y as i64);
                shifted.set_pixel(x as i64, y as i64, [255 - p[0], 255 - p[1], 255 - p[2]]);
            }
        }
        let mut rng = StdRng::seed_from_u64(3);
        assert!(similarity(&cond, &shifted, &frame, &mut rng).is_empty());
    }

    #[test]
    fn four_diagonal_patterns_all_found() {
        let mut reference = solid_frame(400, 400, [10, 10, 10]);
        let patch = checker_frame(50, 50);
        for &(ox, oy) in &[(0i64, 0i64), (100, 100), (200, 200), (300, 300)] {
            for y in 0..50i64 {
                for x in 0..50i64 {
                    reference.set_pixel(ox + x, oy + y, patch.pixel(x, y));
                }
            }
        }
        let cond = ImageCondition {
            frame_id: "f".into(),
            regions: vec![Rect {
                left: 0,
                top: 0,
                right: 49,
                bottom: 49,
            }],
            allow_regions: vec![Rect {
                left: 0,
                top: 0,
                right: 399,
                bottom: 399,
            }],
            method: MatchMethod::CcorrNormed,
            threshold: 0.99,
            padding: 45,
            match_limit: 16,
        };
        let mut rng = StdRng::seed_from_u64(4);
        let mut matches = similarity(&cond, &reference, &reference, &mut rng);
        matches.sort_by_key(|m| (m.row, m.col));
        let positions: Vec<(i64, i64)> = matches.iter().map(|m| (m.row, m.col)).collect();
        assert_eq!(
            positions,
            vec![(0, 0), (100, 100), (200, 200), (300, 300)]
        );
        for m in &matches {
            assert!(m.score > 0.99);
        }
    }
}
