//! Typed bindings for the oracle and the payment token.

use ethers::contract::abigen;

abigen!(
    OracleContract,
    r#"[
        struct Commit { address author; bytes32 commit; uint256 block; bytes32 seed; bool revealed; uint256 verifiedBlock; address consumer; address subsender; uint256 subBlock; uint8 substatus; }
        function getHash(bytes32 seed) external view returns (bytes32)
        function commit(bytes32 hash) external
        function reveal(bytes32 hash, bytes32 seed) external
        function getUserUnverifiedList(address user) external view returns (Commit[])
        event Subscribe(address indexed commiter, address indexed consumer, bytes32 hash)
        event CommitHash(address indexed sender, bytes32 hash, uint256 block)
        event RevealSeed(address indexed commiter, bytes32 hash, bytes32 seed)
        event UnSubscribe(address indexed consumer, bytes32 hash)
        event RandomConsumed(address indexed consumer, bytes32 hash)
    ]"#,
);

abigen!(
    TokenContract,
    r#"[
        function approve(address spender, uint256 amount) external returns (bool)
        function allowance(address owner, address spender) external view returns (uint256)
    ]"#,
);
