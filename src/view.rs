use crate::solution::Solution;

use json::{array, object, JsonValue};
use log::warn;
use std::collections::BTreeMap;
use std::fs::{create_dir_all, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Sender};
use std::thread::{self, JoinHandle};

/// A snapshot of one adaptivity step: the coarse solution and the degree of each leaf
#[derive(Clone, Debug)]
pub struct Frame {
    pub iteration: usize,
    pub solution: Solution,
    pub orders: BTreeMap<usize, u8>,
}

impl Frame {
    pub fn new(iteration: usize, solution: Solution) -> Self {
        let orders = solution.space().orders();
        Self {
            iteration,
            solution,
            orders,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        let mesh = self.solution.space().mesh();
        let elems: Vec<JsonValue> = self
            .orders
            .iter()
            .map(|(elem_id, order)| {
                let rect = mesh.elems[*elem_id].rect;
                let values = self.solution.local_values(*elem_id).unwrap_or(&[]);
                object! {
                    "id": *elem_id,
                    "rect": array![rect.x[0], rect.x[1], rect.y[0], rect.y[1]],
                    "order": *order,
                    "values": JsonValue::from(values.to_vec()),
                }
            })
            .collect();

        object! {
            "iteration": self.iteration,
            "num_dofs": self.solution.num_dofs(),
            "elems": JsonValue::from(elems),
        }
    }
}

/// A visualization hook. Showing a frame must not block the adaptivity loop or report failures to it.
pub trait View: Send {
    fn show(&mut self, frame: Frame);
}

/// Discards every frame
#[derive(Clone, Copy, Debug, Default)]
pub struct NullView;

impl View for NullView {
    fn show(&mut self, _frame: Frame) {}
}

/// Writes each frame to `frame_XXXX.json` in some directory, along with the full refinement tree of its mesh
/// (`mesh_XXXX.json`) when JSON export is enabled
#[derive(Clone, Debug)]
pub struct JsonFrameWriter {
    dir: PathBuf,
}

impl JsonFrameWriter {
    pub fn new(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn frame_path(&self, iteration: usize) -> PathBuf {
        self.dir.join(format!("frame_{:04}.json", iteration))
    }

    fn write(&self, frame: &Frame) -> std::io::Result<()> {
        let f = File::create(self.frame_path(frame.iteration))?;
        let mut w = BufWriter::new(&f);
        frame.to_json().write_pretty(&mut w, 4)?;

        #[cfg(feature = "json_export")]
        frame
            .solution
            .space()
            .mesh()
            .export_to_json(self.mesh_path(frame.iteration))?;
        Ok(())
    }

    pub fn mesh_path(&self, iteration: usize) -> PathBuf {
        self.dir.join(format!("mesh_{:04}.json", iteration))
    }
}

impl View for JsonFrameWriter {
    fn show(&mut self, frame: Frame) {
        if let Err(err) = self.write(&frame) {
            warn!("Failed to write frame {}: {}", frame.iteration, err);
        }
    }
}

/// Forwards frames to another [View] running on a worker thread
///
/// Frames are queued over a channel; dropping the ThreadedView waits for the worker to drain the queue.
pub struct ThreadedView {
    sender: Option<Sender<Frame>>,
    worker: Option<JoinHandle<()>>,
    disconnected: bool,
}

impl ThreadedView {
    pub fn spawn<V>(mut inner: V) -> std::io::Result<Self>
    where
        V: View + 'static,
    {
        let (sender, receiver) = channel::<Frame>();
        let worker = thread::Builder::new()
            .name(String::from("hp_adapt-view"))
            .spawn(move || {
                for frame in receiver {
                    inner.show(frame);
                }
            })?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            disconnected: false,
        })
    }
}

impl View for ThreadedView {
    fn show(&mut self, frame: Frame) {
        let sent = match &self.sender {
            Some(sender) => sender.send(frame).is_ok(),
            None => false,
        };

        if !sent && !self.disconnected {
            warn!("Visualization worker has gone away; frames will be dropped");
            self.disconnected = true;
        }
    }
}

impl Drop for ThreadedView {
    fn drop(&mut self) {
        // closing the channel ends the worker's loop
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Visualization worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bc::EssentialBcs;
    use crate::domain::mesh::Mesh;
    use crate::domain::space::Space;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<usize>>>);

    impl View for Recorder {
        fn show(&mut self, frame: Frame) {
            self.0.lock().unwrap().push(frame.iteration);
        }
    }

    struct Panicker;

    impl View for Panicker {
        fn show(&mut self, _frame: Frame) {
            panic!("broken view");
        }
    }

    fn frame(iteration: usize) -> Frame {
        let mut mesh = Mesh::from_file("./test_input/square_2x2.json").unwrap();
        mesh.set_global_expansion_orders(2).unwrap();
        let space = Arc::new(Space::new(mesh, Arc::new(EssentialBcs::new(|x, _| x))).unwrap());
        let coefficients = vec![0.5; space.num_dofs()];
        Frame::new(iteration, Solution::new(space, coefficients))
    }

    #[test]
    fn threaded_view_delivers_frames_in_order() {
        let shown = Arc::new(Mutex::new(Vec::new()));
        {
            let mut view = ThreadedView::spawn(Recorder(shown.clone())).unwrap();
            for i in 1..=5 {
                view.show(frame(i));
            }
        }
        assert_eq!(*shown.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn dead_worker_does_not_block() {
        let mut view = ThreadedView::spawn(Panicker).unwrap();
        for i in 1..=3 {
            view.show(frame(i));
        }
        drop(view);
    }

    #[test]
    fn frames_are_written_as_json() {
        let dir = std::env::temp_dir().join("hp_adapt_view_test");
        let mut writer = JsonFrameWriter::new(&dir).unwrap();
        writer.show(frame(7));

        let contents = std::fs::read_to_string(writer.frame_path(7)).unwrap();
        let parsed = json::parse(&contents).unwrap();
        assert_eq!(parsed["iteration"].as_usize(), Some(7));
        assert_eq!(parsed["elems"].len(), 4);
        assert_eq!(parsed["elems"][0]["order"].as_u8(), Some(2));
        assert_eq!(parsed["elems"][0]["values"].len(), 9);

        #[cfg(feature = "json_export")]
        {
            let mesh = json::parse(&std::fs::read_to_string(writer.mesh_path(7)).unwrap()).unwrap();
            assert_eq!(mesh["Elems"].len(), 4);
        }
    }
}
