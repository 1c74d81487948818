//! Painless runtime-field scripts evaluated by the search backend.

use serde_json::{json, Value};

/// Resource the job ran on, falling back through the glidein attributes
pub const RESOURCE_NAME: &str = r#"
    String res;
    if (doc.containsKey("MachineAttrGLIDEIN_ResourceName0") && doc["MachineAttrGLIDEIN_ResourceName0.keyword"].size() > 0) {
        res = doc["MachineAttrGLIDEIN_ResourceName0.keyword"].value;
    } else if (doc.containsKey("MATCH_EXP_JOBGLIDEIN_ResourceName") && doc["MATCH_EXP_JOBGLIDEIN_ResourceName.keyword"].size() > 0) {
        res = doc["MATCH_EXP_JOBGLIDEIN_ResourceName.keyword"].value;
    } else {
        res = "Unknown";
    }
    emit(res);
"#;

pub const JOB_START_DATE: &str = r#"
    long res;
    if (doc.containsKey("JobCurrentStartDate") && doc["JobCurrentStartDate"].size() > 0) {
        res = (long)doc["JobCurrentStartDate"].value;
    } else if (doc.containsKey("JobStartDate") && doc["JobStartDate"].size() > 0) {
        res = (long)doc["JobStartDate"].value;
    } else if (doc.containsKey("JobLastStartDate") && doc["JobLastStartDate"].size() > 0) {
        res = (long)doc["JobLastStartDate"].value;
    } else if (doc.containsKey("EnteredCurrentStatus") && doc["EnteredCurrentStatus"].size() > 0) {
        res = (long)doc["EnteredCurrentStatus"].value;
    } else {
        res = (long)doc["QDate"].value;
    }
    emit(res);
"#;

pub const JOB_END_DATE: &str = r#"
    long res;
    if (doc.containsKey("CompletionDate") && doc["CompletionDate"].size() > 0 && (long)doc["CompletionDate"].value > 0) {
        res = (long)doc["CompletionDate"].value;
    } else if (doc.containsKey("JobCurrentFinishTransferOutputDate") && doc["JobCurrentFinishTransferOutputDate"].size() > 0) {
        res = (long)doc["JobCurrentFinishTransferOutputDate"].value;
    } else if (doc.containsKey("TransferOutFinished") && doc["TransferOutFinished"].size() > 0) {
        res = (long)doc["TransferOutFinished"].value;
    } else if (doc.containsKey("EnteredCurrentStatus") && doc["EnteredCurrentStatus"].size() > 0) {
        res = (long)doc["EnteredCurrentStatus"].value;
    } else {
        res = (long)doc["RecordTime"].value;
    }
    emit(res);
"#;

/// Bucket thresholds shared by the wait and wall time scripts
const DURATION_BUCKETS: &str = r#"
    byte bucket = 0;
    if        (duration >= 18*3600) {
        bucket = 7;
    } else if (duration >= 10*3600) {
        bucket = 6;
    } else if (duration >= 5*3600) {
        bucket = 5;
    } else if (duration >= 3600) {
        bucket = 4;
    } else if (duration >= 30*60) {
        bucket = 3;
    } else if (duration >= 30) {
        bucket = 2;
    } else if (duration >= 1) {
        bucket = 1;
    }
    emit(bucket);
"#;

pub fn wait_time_bucket() -> String {
    format!(
        r#"
    long duration = 0;
    if (doc.containsKey("QDate") && doc["QDate"].size() > 0) {{
        duration = (long)doc["JobThisStartDate"].value - (long)doc["QDate"].value;
    }}
{}"#,
        DURATION_BUCKETS
    )
}

pub fn wall_time_bucket() -> String {
    format!(
        r#"
    long duration = 0;
    if (doc.containsKey("LastRemoteWallClockTime") && doc["LastRemoteWallClockTime"].size() > 0) {{
        duration = (long)doc["LastRemoteWallClockTime"].value;
    }} else {{
        duration = (long)doc["JobThisEndDate"].value - (long)doc["JobThisStartDate"].value;
    }}
{}"#,
        DURATION_BUCKETS
    )
}

/// Wall time a job spent inside `[start_ts, end_ts)`
pub fn period_wall_time(start_ts: i64, end_ts: i64) -> String {
    format!(
        r#"
    long period_start_time = {start};
    long period_end_time = {end};
    long period_max_time = {max};

    long job_total_wall_time = period_max_time;
    long job_wall_time_left = period_max_time;
    long job_wall_time_right = period_max_time;

    long job_start_time = (long)doc["JobThisStartDate"].value;
    long job_end_time = (long)doc["JobThisEndDate"].value;
    if (job_end_time >= job_start_time) {{
        job_total_wall_time = job_end_time - job_start_time;
    }}
    if (doc.containsKey("LastRemoteWallClockTime") && doc["LastRemoteWallClockTime"].size() > 0) {{
        job_total_wall_time = (long)doc["LastRemoteWallClockTime"].value;
    }}
    if (job_end_time >= period_start_time) {{
        job_wall_time_left = job_end_time - period_start_time;
    }}
    if (period_end_time >= job_start_time) {{
        job_wall_time_right = period_end_time - job_start_time;
    }}
    long tmp_min1 = (long)Math.min(job_wall_time_left, job_wall_time_right);
    long tmp_min2 = (long)Math.min(job_total_wall_time, period_max_time);
    emit((long)Math.min(tmp_min1, tmp_min2));
"#,
        start = start_ts,
        end = end_ts,
        max = end_ts - start_ts
    )
}

/// Queue wait a job spent inside `[start_ts, end_ts)`
pub fn period_wait_time(start_ts: i64, end_ts: i64) -> String {
    format!(
        r#"
    long period_start_time = {start};
    long period_end_time = {end};
    long period_max_time = {max};

    long job_total_wait_time = period_max_time;
    long job_wait_time_left = period_max_time;
    long job_wait_time_right = period_max_time;

    long job_q_time = (long)doc["QDate"].value;
    long job_start_time = (long)doc["JobThisStartDate"].value;
    if (job_start_time >= job_q_time) {{
        job_total_wait_time = job_start_time - job_q_time;
    }}
    if (job_start_time >= period_start_time) {{
        job_wait_time_left = job_start_time - period_start_time;
    }}
    if (period_end_time >= job_q_time) {{
        job_wait_time_right = period_end_time - job_q_time;
    }}
    long tmp_min1 = (long)Math.min(job_wait_time_left, job_wait_time_right);
    long tmp_min2 = (long)Math.min(job_total_wait_time, period_max_time);
    emit((long)Math.min(tmp_min1, tmp_min2));
"#,
        start = start_ts,
        end = end_ts,
        max = end_ts - start_ts
    )
}

/// Runtime mapping entry for a painless script
pub fn runtime_field(field_type: &str, source: &str) -> Value {
    json!({
        "type": field_type,
        "script": {
            "language": "painless",
            "source": source,
        },
    })
}
