//! JSON-lines bridge to an external geometry engine worker.
//!
//! The worker is spawned as a subprocess, announces itself with a `ready`
//! line, then answers one request line per operation:
//!
//! ```text
//! -> {"type":"call","id":"req-1","op":{"op":"exists","dataset":{...}}}
//! <- {"type":"result","id":"req-1","value":true}
//! <- {"type":"error","id":"req-2","error":"ERROR 000732: ..."}
//! ```

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use contourkit_shared::{
    ContourError, CoordinateSystem, DatasetHandle, FieldExpression, FieldSpec, LengthUnit,
    Predicate, Result, SpatialReference,
};

use crate::{ContourParams, FootprintParams, GeometryEngine, Selection, SmoothParams};

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

/// One engine operation, as sent to the worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EngineRequest {
    CheckOutExtension { extension: String },
    CheckInExtension { extension: String },
    SetOverwriteOutput { enabled: bool },
    GetParallelProcessingFactor,
    SetParallelProcessingFactor { factor: Option<String> },
    Exists { dataset: DatasetHandle },
    Delete { dataset: DatasetHandle },
    Compact { container: DatasetHandle },
    CreateContainer { container: DatasetHandle },
    CreateFeatureDataset { dataset: DatasetHandle, srs: SpatialReference },
    CopyFeatures { input: DatasetHandle, output: DatasetHandle },
    ListFeatureClasses { dataset: DatasetHandle },
    ListFields { dataset: DatasetHandle },
    SetRasterNodata { raster: PathBuf, value: f64 },
    BuildMosaic { mosaic: DatasetHandle, raster_dir: PathBuf },
    MosaicCrs { mosaic: DatasetHandle },
    ComputeStatistics { mosaic: DatasetHandle },
    DefineMosaicNodata { mosaic: DatasetHandle, value: f64 },
    BuildFootprints { mosaic: DatasetHandle, params: FootprintParams },
    ExportBoundary { mosaic: DatasetHandle, output: DatasetHandle },
    ExtractContours { raster: DatasetHandle, output: DatasetHandle, params: ContourParams },
    SmoothLines { input: DatasetHandle, output: DatasetHandle, params: SmoothParams },
    SelectByAttribute { dataset: DatasetHandle, where_clause: String },
    DeleteSelected { selection: Selection },
    SelectTo { input: DatasetHandle, output: DatasetHandle, where_clause: String },
    Reproject { input: DatasetHandle, output: DatasetHandle, srs: SpatialReference },
    RecalculateExtent { dataset: DatasetHandle },
    RepairGeometry { dataset: DatasetHandle },
    AddField { dataset: DatasetHandle, field: FieldSpec },
    CalculateField { dataset: DatasetHandle, field: String, expression: FieldExpression },
    DeleteFields { dataset: DatasetHandle, fields: Vec<String> },
    SplitByGrid {
        input: DatasetHandle,
        grid: DatasetHandle,
        split_field: String,
        workspace: DatasetHandle,
    },
    MultipartToSinglepart { input: DatasetHandle, output: DatasetHandle },
    RecalculateLength { dataset: DatasetHandle, field: String, unit: LengthUnit },
    ExportVector { input: DatasetHandle, path: PathBuf },
    ExportCad { input: DatasetHandle, format: String, path: PathBuf },
    Intersect { a: DatasetHandle, b: DatasetHandle, output: DatasetHandle },
    Dissolve { input: DatasetHandle, output: DatasetHandle },
    Clip { target: DatasetHandle, clipper: DatasetHandle, output: DatasetHandle },
    DeleteDisjoint { target: DatasetHandle, others: Vec<DatasetHandle> },
    ExportGeojson { input: DatasetHandle, path: PathBuf },
}

impl EngineRequest {
    /// Operation name, as used in error messages.
    pub fn operation(&self) -> String {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.get("op").and_then(|op| op.as_str()).map(String::from))
            .unwrap_or_else(|| "unknown".into())
    }
}

/// Request message sent to the worker.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum RequestMessage<'a> {
    #[serde(rename = "call")]
    Call { id: &'a str, op: &'a EngineRequest },
    #[serde(rename = "shutdown")]
    Shutdown,
}

/// Response message received from the worker.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseMessage {
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "result")]
    Result {
        id: String,
        #[serde(default)]
        value: serde_json::Value,
    },
    #[serde(rename = "error")]
    Error { id: String, error: String },
}

// ---------------------------------------------------------------------------
// BridgeEngine
// ---------------------------------------------------------------------------

/// How to launch the engine worker.
#[derive(Debug, Clone)]
pub struct BridgeCommand {
    /// Interpreter or executable (e.g. "python").
    pub command: String,
    /// Worker script passed as the first argument.
    pub script: String,
    /// Working directory for the worker.
    pub working_dir: PathBuf,
}

/// [`GeometryEngine`] backed by an external worker process.
pub struct BridgeEngine {
    child: Option<Child>,
    writer: Box<dyn Write + Send>,
    reader: Box<dyn BufRead + Send>,
    request_counter: u64,
}

impl BridgeEngine {
    /// Spawn the worker and wait for its ready signal.
    pub fn spawn(command: &BridgeCommand) -> Result<Self> {
        info!(cmd = %command.command, script = %command.script, "spawning engine worker");

        let mut child = Command::new(&command.command)
            .arg(&command.script)
            .current_dir(&command.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                ContourError::Bridge(format!(
                    "failed to spawn engine worker: {e}. Is `{}` installed?",
                    command.command
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ContourError::Bridge("failed to capture worker stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ContourError::Bridge("failed to capture worker stdout".into()))?;

        let mut engine = Self {
            child: Some(child),
            writer: Box::new(stdin),
            reader: Box::new(BufReader::new(stdout)),
            request_counter: 0,
        };
        engine.wait_for_ready()?;
        Ok(engine)
    }

    /// Connect over already-open streams (a socket, a pipe pair).
    pub fn from_streams(
        reader: impl BufRead + Send + 'static,
        writer: impl Write + Send + 'static,
    ) -> Result<Self> {
        let mut engine = Self {
            child: None,
            writer: Box::new(writer),
            reader: Box::new(reader),
            request_counter: 0,
        };
        engine.wait_for_ready()?;
        Ok(engine)
    }

    fn read_message(&mut self) -> Result<(String, ResponseMessage)> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|e| ContourError::Bridge(format!("worker read error: {e}")))?;

        if line.is_empty() {
            return Err(ContourError::Bridge(
                "worker closed stdout unexpectedly".into(),
            ));
        }

        let msg = serde_json::from_str(line.trim()).map_err(|e| {
            ContourError::Bridge(format!(
                "invalid worker message: {e} (got: {})",
                excerpt(line.trim(), 200)
            ))
        })?;
        Ok((line, msg))
    }

    fn wait_for_ready(&mut self) -> Result<()> {
        match self.read_message()? {
            (_, ResponseMessage::Ready) => {
                info!("engine worker is ready");
                Ok(())
            }
            (line, _) => Err(ContourError::Bridge(format!(
                "expected ready message, got: {}",
                line.trim()
            ))),
        }
    }

    /// Send one operation and wait for its raw result value.
    pub fn call(&mut self, request: &EngineRequest) -> Result<serde_json::Value> {
        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);
        let operation = request.operation();

        let json = serde_json::to_string(&RequestMessage::Call { id: &id, op: request })
            .map_err(|e| ContourError::Bridge(format!("failed to serialize request: {e}")))?;

        debug!(%id, %operation, "engine call");
        writeln!(self.writer, "{json}")
            .map_err(|e| ContourError::Bridge(format!("failed to write to worker: {e}")))?;
        self.writer
            .flush()
            .map_err(|e| ContourError::Bridge(format!("failed to flush worker stdin: {e}")))?;

        match self.read_message()? {
            (_, ResponseMessage::Result { id: resp_id, value }) if resp_id == id => Ok(value),
            (_, ResponseMessage::Error { id: resp_id, error }) if resp_id == id => {
                Err(ContourError::engine(operation, error))
            }
            (line, ResponseMessage::Ready) => Err(ContourError::Bridge(format!(
                "unexpected ready message during `{operation}`: {}",
                line.trim()
            ))),
            (line, _) => Err(ContourError::Bridge(format!(
                "response id mismatch for {id}: {}",
                line.trim()
            ))),
        }
    }

    fn call_as<T: DeserializeOwned>(&mut self, request: EngineRequest) -> Result<T> {
        let value = self.call(&request)?;
        serde_json::from_value(value).map_err(|e| {
            ContourError::Bridge(format!(
                "unexpected result shape for `{}`: {e}",
                request.operation()
            ))
        })
    }

    fn call_unit(&mut self, request: EngineRequest) -> Result<()> {
        self.call(&request).map(|_| ())
    }

    /// Send shutdown and wait for the worker to exit.
    pub fn shutdown(mut self) -> Result<()> {
        self.send_shutdown();
        Ok(())
    }

    fn send_shutdown(&mut self) {
        if let Ok(json) = serde_json::to_string(&RequestMessage::Shutdown) {
            let _ = writeln!(self.writer, "{json}");
            let _ = self.writer.flush();
        }

        if let Some(mut child) = self.child.take() {
            match child.wait() {
                Ok(status) => info!(?status, "engine worker exited"),
                Err(e) => warn!("engine worker wait error: {e}"),
            }
        }
    }
}

impl Drop for BridgeEngine {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.send_shutdown();
        }
    }
}

fn handle(path: &Path) -> PathBuf {
    path.to_path_buf()
}

impl GeometryEngine for BridgeEngine {
    fn name(&self) -> &str {
        "bridge"
    }

    fn check_out_extension(&mut self, extension: &str) -> Result<()> {
        self.call_unit(EngineRequest::CheckOutExtension {
            extension: extension.into(),
        })
    }

    fn check_in_extension(&mut self, extension: &str) -> Result<()> {
        self.call_unit(EngineRequest::CheckInExtension {
            extension: extension.into(),
        })
    }

    fn set_overwrite_output(&mut self, enabled: bool) -> Result<()> {
        self.call_unit(EngineRequest::SetOverwriteOutput { enabled })
    }

    fn parallel_processing_factor(&mut self) -> Result<Option<String>> {
        self.call_as(EngineRequest::GetParallelProcessingFactor)
    }

    fn set_parallel_processing_factor(&mut self, factor: Option<String>) -> Result<()> {
        self.call_unit(EngineRequest::SetParallelProcessingFactor { factor })
    }

    fn exists(&mut self, dataset: &DatasetHandle) -> Result<bool> {
        self.call_as(EngineRequest::Exists {
            dataset: dataset.clone(),
        })
    }

    fn delete(&mut self, dataset: &DatasetHandle) -> Result<()> {
        self.call_unit(EngineRequest::Delete {
            dataset: dataset.clone(),
        })
    }

    fn compact(&mut self, container: &DatasetHandle) -> Result<()> {
        self.call_unit(EngineRequest::Compact {
            container: container.clone(),
        })
    }

    fn create_container(&mut self, container: &DatasetHandle) -> Result<()> {
        self.call_unit(EngineRequest::CreateContainer {
            container: container.clone(),
        })
    }

    fn create_feature_dataset(
        &mut self,
        dataset: &DatasetHandle,
        srs: SpatialReference,
    ) -> Result<()> {
        self.call_unit(EngineRequest::CreateFeatureDataset {
            dataset: dataset.clone(),
            srs,
        })
    }

    fn copy_features(&mut self, input: &DatasetHandle, output: &DatasetHandle) -> Result<()> {
        self.call_unit(EngineRequest::CopyFeatures {
            input: input.clone(),
            output: output.clone(),
        })
    }

    fn list_feature_classes(&mut self, dataset: &DatasetHandle) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.call_as(EngineRequest::ListFeatureClasses {
            dataset: dataset.clone(),
        })?;
        names.sort();
        Ok(names)
    }

    fn list_fields(&mut self, dataset: &DatasetHandle) -> Result<Vec<String>> {
        self.call_as(EngineRequest::ListFields {
            dataset: dataset.clone(),
        })
    }

    fn set_raster_nodata(&mut self, raster: &Path, value: f64) -> Result<()> {
        self.call_unit(EngineRequest::SetRasterNodata {
            raster: handle(raster),
            value,
        })
    }

    fn build_mosaic(&mut self, mosaic: &DatasetHandle, raster_dir: &Path) -> Result<()> {
        self.call_unit(EngineRequest::BuildMosaic {
            mosaic: mosaic.clone(),
            raster_dir: handle(raster_dir),
        })
    }

    fn mosaic_crs(&mut self, mosaic: &DatasetHandle) -> Result<CoordinateSystem> {
        self.call_as(EngineRequest::MosaicCrs {
            mosaic: mosaic.clone(),
        })
    }

    fn compute_statistics(&mut self, mosaic: &DatasetHandle) -> Result<()> {
        self.call_unit(EngineRequest::ComputeStatistics {
            mosaic: mosaic.clone(),
        })
    }

    fn define_mosaic_nodata(&mut self, mosaic: &DatasetHandle, value: f64) -> Result<()> {
        self.call_unit(EngineRequest::DefineMosaicNodata {
            mosaic: mosaic.clone(),
            value,
        })
    }

    fn build_footprints(
        &mut self,
        mosaic: &DatasetHandle,
        params: &FootprintParams,
    ) -> Result<()> {
        self.call_unit(EngineRequest::BuildFootprints {
            mosaic: mosaic.clone(),
            params: params.clone(),
        })
    }

    fn export_boundary(&mut self, mosaic: &DatasetHandle, output: &DatasetHandle) -> Result<()> {
        self.call_unit(EngineRequest::ExportBoundary {
            mosaic: mosaic.clone(),
            output: output.clone(),
        })
    }

    fn extract_contours(
        &mut self,
        raster: &DatasetHandle,
        output: &DatasetHandle,
        params: &ContourParams,
    ) -> Result<()> {
        self.call_unit(EngineRequest::ExtractContours {
            raster: raster.clone(),
            output: output.clone(),
            params: params.clone(),
        })
    }

    fn smooth_lines(
        &mut self,
        input: &DatasetHandle,
        output: &DatasetHandle,
        params: &SmoothParams,
    ) -> Result<()> {
        self.call_unit(EngineRequest::SmoothLines {
            input: input.clone(),
            output: output.clone(),
            params: params.clone(),
        })
    }

    fn select_by_attribute(
        &mut self,
        dataset: &DatasetHandle,
        predicate: &Predicate,
    ) -> Result<Selection> {
        let where_clause = predicate.to_where_clause();
        let count: u64 = self.call_as(EngineRequest::SelectByAttribute {
            dataset: dataset.clone(),
            where_clause: where_clause.clone(),
        })?;
        Ok(Selection {
            dataset: dataset.clone(),
            where_clause,
            count,
        })
    }

    fn delete_selected(&mut self, selection: &Selection) -> Result<u64> {
        self.call_as(EngineRequest::DeleteSelected {
            selection: selection.clone(),
        })
    }

    fn select_to(
        &mut self,
        input: &DatasetHandle,
        output: &DatasetHandle,
        predicate: &Predicate,
    ) -> Result<u64> {
        self.call_as(EngineRequest::SelectTo {
            input: input.clone(),
            output: output.clone(),
            where_clause: predicate.to_where_clause(),
        })
    }

    fn reproject(
        &mut self,
        input: &DatasetHandle,
        output: &DatasetHandle,
        srs: SpatialReference,
    ) -> Result<()> {
        self.call_unit(EngineRequest::Reproject {
            input: input.clone(),
            output: output.clone(),
            srs,
        })
    }

    fn recalculate_extent(&mut self, dataset: &DatasetHandle) -> Result<()> {
        self.call_unit(EngineRequest::RecalculateExtent {
            dataset: dataset.clone(),
        })
    }

    fn repair_geometry(&mut self, dataset: &DatasetHandle) -> Result<()> {
        self.call_unit(EngineRequest::RepairGeometry {
            dataset: dataset.clone(),
        })
    }

    fn add_field(&mut self, dataset: &DatasetHandle, field: &FieldSpec) -> Result<()> {
        self.call_unit(EngineRequest::AddField {
            dataset: dataset.clone(),
            field: field.clone(),
        })
    }

    fn calculate_field(
        &mut self,
        dataset: &DatasetHandle,
        field: &str,
        expression: &FieldExpression,
    ) -> Result<()> {
        self.call_unit(EngineRequest::CalculateField {
            dataset: dataset.clone(),
            field: field.into(),
            expression: expression.clone(),
        })
    }

    fn delete_fields(&mut self, dataset: &DatasetHandle, fields: &[String]) -> Result<()> {
        self.call_unit(EngineRequest::DeleteFields {
            dataset: dataset.clone(),
            fields: fields.to_vec(),
        })
    }

    fn split_by_grid(
        &mut self,
        input: &DatasetHandle,
        grid: &DatasetHandle,
        split_field: &str,
        workspace: &DatasetHandle,
    ) -> Result<Vec<String>> {
        self.call_as(EngineRequest::SplitByGrid {
            input: input.clone(),
            grid: grid.clone(),
            split_field: split_field.into(),
            workspace: workspace.clone(),
        })
    }

    fn multipart_to_singlepart(
        &mut self,
        input: &DatasetHandle,
        output: &DatasetHandle,
    ) -> Result<()> {
        self.call_unit(EngineRequest::MultipartToSinglepart {
            input: input.clone(),
            output: output.clone(),
        })
    }

    fn recalculate_length(
        &mut self,
        dataset: &DatasetHandle,
        field: &str,
        unit: LengthUnit,
    ) -> Result<()> {
        self.call_unit(EngineRequest::RecalculateLength {
            dataset: dataset.clone(),
            field: field.into(),
            unit,
        })
    }

    fn export_vector(&mut self, input: &DatasetHandle, path: &Path) -> Result<()> {
        self.call_unit(EngineRequest::ExportVector {
            input: input.clone(),
            path: handle(path),
        })
    }

    fn export_cad(&mut self, input: &DatasetHandle, format: &str, path: &Path) -> Result<()> {
        self.call_unit(EngineRequest::ExportCad {
            input: input.clone(),
            format: format.into(),
            path: handle(path),
        })
    }

    fn intersect(
        &mut self,
        a: &DatasetHandle,
        b: &DatasetHandle,
        output: &DatasetHandle,
    ) -> Result<()> {
        self.call_unit(EngineRequest::Intersect {
            a: a.clone(),
            b: b.clone(),
            output: output.clone(),
        })
    }

    fn dissolve(&mut self, input: &DatasetHandle, output: &DatasetHandle) -> Result<()> {
        self.call_unit(EngineRequest::Dissolve {
            input: input.clone(),
            output: output.clone(),
        })
    }

    fn clip(
        &mut self,
        target: &DatasetHandle,
        clipper: &DatasetHandle,
        output: &DatasetHandle,
    ) -> Result<()> {
        self.call_unit(EngineRequest::Clip {
            target: target.clone(),
            clipper: clipper.clone(),
            output: output.clone(),
        })
    }

    fn delete_disjoint(
        &mut self,
        target: &DatasetHandle,
        others: &[DatasetHandle],
    ) -> Result<u64> {
        self.call_as(EngineRequest::DeleteDisjoint {
            target: target.clone(),
            others: others.to_vec(),
        })
    }

    fn export_geojson(&mut self, input: &DatasetHandle, path: &Path) -> Result<()> {
        self.call_unit(EngineRequest::ExportGeojson {
            input: input.clone(),
            path: handle(path),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// At most `max_chars` characters of `line`, for error messages.
fn excerpt(line: &str, max_chars: usize) -> &str {
    match line.char_indices().nth(max_chars) {
        Some((end, _)) => &line[..end],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    /// Writer that keeps everything written so tests can inspect requests.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<serde_json::Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    fn engine_with(responses: &[&str]) -> (BridgeEngine, SharedBuf) {
        let mut script = String::from("{\"type\":\"ready\"}\n");
        for r in responses {
            script.push_str(r);
            script.push('\n');
        }
        let sink = SharedBuf::default();
        let engine = BridgeEngine::from_streams(Cursor::new(script.into_bytes()), sink.clone())
            .expect("ready handshake");
        (engine, sink)
    }

    #[test]
    fn request_serializes_with_op_tag() {
        let req = EngineRequest::Exists {
            dataset: DatasetHandle::new("/w/wip.gdb", "Mosaic_Dataset"),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["op"], "exists");
        assert_eq!(json["dataset"]["name"], "Mosaic_Dataset");
        assert_eq!(req.operation(), "exists");
    }

    #[test]
    fn call_returns_typed_result() {
        let (mut engine, sink) = engine_with(&[r#"{"type":"result","id":"req-1","value":true}"#]);
        let exists = engine
            .exists(&DatasetHandle::new("/w/wip.gdb", "Contour_Lines"))
            .unwrap();
        assert!(exists);

        let sent = sink.lines();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "call");
        assert_eq!(sent[0]["id"], "req-1");
        assert_eq!(sent[0]["op"]["op"], "exists");
    }

    #[test]
    fn worker_error_becomes_engine_error() {
        let (mut engine, _) = engine_with(&[
            r#"{"type":"error","id":"req-1","error":"ERROR 000732: dataset does not exist"}"#,
        ]);
        let err = engine
            .compute_statistics(&DatasetHandle::new("/w/wip.gdb", "Mosaic_Dataset"))
            .unwrap_err();
        match err {
            ContourError::Engine { operation, message } => {
                assert_eq!(operation, "compute_statistics");
                assert!(message.contains("000732"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn closed_stdout_is_bridge_error() {
        let (mut engine, _) = engine_with(&[]);
        let err = engine
            .delete(&DatasetHandle::container("/w/wip.gdb"))
            .unwrap_err();
        assert!(matches!(err, ContourError::Bridge(_)));
    }

    #[test]
    fn mismatched_id_is_rejected() {
        let (mut engine, _) = engine_with(&[r#"{"type":"result","id":"req-9","value":null}"#]);
        let err = engine
            .compact(&DatasetHandle::container("/w/wip.gdb"))
            .unwrap_err();
        assert!(err.to_string().contains("mismatch"));
    }

    #[test]
    fn missing_ready_fails_handshake() {
        let sink = SharedBuf::default();
        let result = BridgeEngine::from_streams(
            Cursor::new(b"{\"type\":\"result\",\"id\":\"x\",\"value\":1}\n".to_vec()),
            sink,
        );
        assert!(result.is_err());
    }

    #[test]
    fn non_json_output_with_multibyte_text_is_bridge_error() {
        let noise = format!("{}é", "x".repeat(199));
        let (mut engine, _) = engine_with(&[noise.as_str()]);
        let err = engine
            .compact(&DatasetHandle::container("/w/wip.gdb"))
            .unwrap_err();
        assert!(matches!(err, ContourError::Bridge(_)));
        assert!(err.to_string().contains(&noise));
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("abc", 200), "abc");
        assert_eq!(excerpt("héllo", 2), "hé");
        assert_eq!(excerpt(&format!("{}é", "x".repeat(200)), 200), "x".repeat(200));
        assert_eq!(excerpt("", 5), "");
    }

    #[test]
    fn select_by_attribute_sends_where_clause() {
        let (mut engine, sink) = engine_with(&[r#"{"type":"result","id":"req-1","value":42}"#]);
        let ds = DatasetHandle::new("/w/wip.gdb", "Contour_Lines");
        let selection = engine
            .select_by_attribute(
                &ds,
                &Predicate::LessThan {
                    field: "Shape_Length".into(),
                    value: 5.0,
                },
            )
            .unwrap();
        assert_eq!(selection.count, 42);
        assert_eq!(selection.where_clause, "Shape_Length < 5");
        assert_eq!(sink.lines()[0]["op"]["where_clause"], "Shape_Length < 5");
    }

    #[test]
    fn ids_increment_per_call() {
        let (mut engine, sink) = engine_with(&[
            r#"{"type":"result","id":"req-1","value":null}"#,
            r#"{"type":"result","id":"req-2","value":["Elevation","Line_Type"]}"#,
        ]);
        let ds = DatasetHandle::new("/w/sp.gdb", "Contour_Lines_SP");
        engine.recalculate_extent(&ds).unwrap();
        let fields = engine.list_fields(&ds).unwrap();
        assert_eq!(fields, vec!["Elevation", "Line_Type"]);
        let ids: Vec<_> = sink.lines().iter().map(|l| l["id"].clone()).collect();
        assert_eq!(ids, vec!["req-1", "req-2"]);
    }
}
