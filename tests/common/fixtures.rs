use drawdiff::{
    AnnotationError, AnnotationRequest, AnnotationResponse, Annotator, CancelSignal, ImageSource, Progress, RasterImage,
};
use image::{DynamicImage, ImageBuffer, Rgba, RgbaImage};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

type Responder = Box<dyn Fn(&AnnotationRequest) -> Result<AnnotationResponse, AnnotationError> + Send + Sync>;

/// Scripted stand-in for the annotation service.
///
/// Counts calls, tracks how many are in flight at once and can trip a cancel
/// signal after a given number of calls.
pub struct MockAnnotator {
    responder: Responder,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen_tiles: Mutex<Vec<usize>>,
    cancel_after: Option<(usize, CancelSignal)>,
}

impl MockAnnotator {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&AnnotationRequest) -> Result<AnnotationResponse, AnnotationError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            seen_tiles: Mutex::new(Vec::new()),
            cancel_after: None,
        }
    }

    /// Every tile answers with the same text and token count
    pub fn answering(text: &str, tokens: Option<u64>) -> Self {
        let text = text.to_string();
        Self::new(move |_| {
            Ok(AnnotationResponse {
                raw_text: text.clone(),
                tokens_used: tokens,
            })
        })
    }

    /// Every tile reports one change covering the whole tile
    pub fn whole_tile(tokens: u64) -> Self {
        Self::answering(&candidate_json("ADDED", [0.0, 0.0, 1000.0, 1000.0]), Some(tokens))
    }

    pub fn cancel_after(mut self, calls: usize, cancel: CancelSignal) -> Self {
        self.cancel_after = Some((calls, cancel));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn seen_tiles(&self) -> Vec<usize> {
        self.seen_tiles.lock().unwrap().clone()
    }
}

impl Annotator for MockAnnotator {
    async fn annotate(&self, request: &AnnotationRequest) -> Result<AnnotationResponse, AnnotationError> {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen_tiles.lock().unwrap().push(request.tile_index);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // Let the other calls of the batch start before this one finishes
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some((limit, cancel)) = &self.cancel_after
            && calls >= *limit
        {
            cancel.cancel();
        }

        (self.responder)(request)
    }
}

/// One-element JSON answer in the service's wire format
pub fn candidate_json(kind: &str, box_2d: [f64; 4]) -> String {
    format!(
        r#"[{{"title":"Change","description":"test","category":"EQUIPMENT","type":"{}","box_2d":[{},{},{},{}]}}]"#,
        kind, box_2d[0], box_2d[1], box_2d[2], box_2d[3]
    )
}

/// White drawing of the given size
pub fn blank_drawing(width: u32, height: u32) -> RgbaImage {
    ImageBuffer::from_pixel(width, height, WHITE)
}

/// White drawing with black filled rectangles `(x, y, w, h)`
pub fn drawing_with(width: u32, height: u32, marks: &[(u32, u32, u32, u32)]) -> RgbaImage {
    ImageBuffer::from_fn(width, height, |x, y| {
        let inside = marks
            .iter()
            .any(|&(mx, my, mw, mh)| x >= mx && x < mx + mw && y >= my && y < my + mh);
        if inside { BLACK } else { WHITE }
    })
}

pub fn raster(image: RgbaImage) -> RasterImage {
    RasterImage::new(image)
}

pub fn source(image: RgbaImage) -> ImageSource {
    ImageSource::Decoded(DynamicImage::ImageRgba8(image))
}

/// Collects every progress report of a run
#[derive(Default)]
pub struct ProgressLog {
    events: Mutex<Vec<Progress>>,
}

impl ProgressLog {
    pub fn sink(&self) -> impl Fn(&Progress) + Send + Sync + '_ {
        move |p: &Progress| self.events.lock().unwrap().push(p.clone())
    }

    pub fn events(&self) -> Vec<Progress> {
        self.events.lock().unwrap().clone()
    }
}
